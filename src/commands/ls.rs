//! The `ls` command: lists what lives under the clone root.

use anyhow::Result;
use clap::Args;
use std::path::PathBuf;

use crate::colorlog;
use crate::config::Settings;
use crate::utils::dir_size_mb;

#[derive(Args, Debug, Default)]
pub struct LsArgs {
    /// Directories to list, relative to the clone root; empty lists the root
    pub dirs: Vec<String>,
    /// Include the total size of each directory
    #[arg(long)]
    pub total: bool,
}

pub fn run(args: LsArgs) -> Result<i32> {
    let settings = Settings::from_env();
    let root = PathBuf::from(&settings.absolute_path_to_clone_to);

    let targets: Vec<PathBuf> = if args.dirs.is_empty() {
        vec![root.clone()]
    } else {
        args.dirs.iter().map(|d| root.join(d)).collect()
    };

    for target in targets {
        if !target.is_dir() {
            colorlog::print_error(format!("{} is not a directory", target.display()));
            continue;
        }
        let mut entries: Vec<PathBuf> = std::fs::read_dir(&target)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        entries.sort();

        for entry in entries {
            if args.total {
                match dir_size_mb(&entry) {
                    Ok(mb) => colorlog::print_info(format!(
                        "{}  ({mb:.2} MB)",
                        entry.display()
                    )),
                    Err(_) => colorlog::print_info(format!("{}", entry.display())),
                }
            } else {
                colorlog::print_info(format!("{}", entry.display()));
            }
        }
    }
    Ok(0)
}
