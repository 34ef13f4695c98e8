//! Local git fixture builders.
//!
//! Each fixture is a working repository plus a bare twin that plays the
//! remote: clones point at the bare path, and advancing the remote means
//! committing in the work tree and pushing.
#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;

/// True when a usable git binary is on PATH. Tests bail out early (and
/// loudly) instead of failing confusingly on machines without git.
pub fn is_git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Runs git in `dir` with a fixed test identity, panicking on failure so
/// broken fixtures surface at the point of setup.
pub fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.email=test@example.com",
            "-c",
            "user.name=Test",
            "-c",
            "init.defaultBranch=main",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed in {}: {}",
        args,
        dir.display(),
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// A fixture remote: a bare repository (the clone source) plus the work
/// tree used to publish commits into it.
pub struct RemoteRepo {
    pub work: PathBuf,
    pub bare: PathBuf,
}

impl RemoteRepo {
    /// Creates a remote with a single commit on `main`.
    pub fn create(root: &Path, name: &str) -> RemoteRepo {
        let work = root.join(format!("{name}-work"));
        let bare = root.join(format!("{name}.git"));
        std::fs::create_dir_all(&work).unwrap();

        run_git(&work, &["init", "--quiet"]);
        run_git(&work, &["checkout", "-q", "-b", "main"]);
        std::fs::write(work.join("README.md"), format!("# {name}\n")).unwrap();
        run_git(&work, &["add", "."]);
        run_git(&work, &["commit", "-q", "-m", "initial commit"]);

        run_git(root, &[
            "clone",
            "--quiet",
            "--bare",
            work.to_str().unwrap(),
            bare.to_str().unwrap(),
        ]);
        run_git(&work, &["remote", "add", "origin", bare.to_str().unwrap()]);

        RemoteRepo { work, bare }
    }

    /// Creates a remote that advertises no branches at all.
    pub fn create_empty(root: &Path, name: &str) -> RemoteRepo {
        let bare = root.join(format!("{name}.git"));
        std::fs::create_dir_all(&bare).unwrap();
        run_git(root, &["init", "--quiet", "--bare", bare.to_str().unwrap()]);
        RemoteRepo {
            work: root.join(format!("{name}-work")),
            bare,
        }
    }

    /// Publishes one more commit touching `filename` to the remote.
    pub fn add_commit(&self, filename: &str) {
        std::fs::write(self.work.join(filename), "contents\n").unwrap();
        run_git(&self.work, &["add", "."]);
        run_git(
            &self.work,
            &["commit", "-q", "-m", &format!("add {filename}")],
        );
        run_git(&self.work, &["push", "-q", "origin", "main"]);
    }

    /// The URL clones should use.
    pub fn url(&self) -> String {
        self.bare.display().to_string()
    }
}
