use clap::{Parser, Subcommand};
use std::process::ExitCode;

use gitfleet::colorlog;
use gitfleet::commands::{clone, ls, reclone, reclone_cron, reclone_server};

#[derive(Parser)]
#[command(
    name = "gitfleet",
    version,
    about = "Bulk-clone and mirror whole fleets of repositories"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Clone every repo of an org or user
    Clone(clone::CloneArgs),
    /// Rerun saved clone invocations
    Reclone(reclone::RecloneArgs),
    /// Run reclone on a fixed interval
    RecloneCron(reclone_cron::RecloneCronArgs),
    /// HTTP server for triggering reclones
    RecloneServer(reclone_server::RecloneServerArgs),
    /// List clone directories
    Ls(ls::LsArgs),
    /// Print the version
    Version,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Clone(args) => clone::run(args).await,
        Commands::Reclone(args) => reclone::run(args),
        Commands::RecloneCron(args) => reclone_cron::run(args),
        Commands::RecloneServer(args) => reclone_server::run(args).await,
        Commands::Ls(args) => ls::run(args),
        Commands::Version => {
            println!("gitfleet {}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
    };

    match result {
        Ok(code) => ExitCode::from(code.clamp(0, 255) as u8),
        Err(err) => {
            colorlog::print_error(format!("{err:#}"));
            ExitCode::FAILURE
        }
    }
}
