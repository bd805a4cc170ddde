use anyhow::Result;
use clap::Parser;

mod cli;

use cli::run::RunCommand;

#[derive(Parser)]
#[command(name = "testrig")]
#[command(about = "Deploys, runs and collects remote tests described in YAML", long_about = None)]
struct Cli {
    #[command(flatten)]
    run: RunCommand,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // INFO by default, DEBUG with --verbose; RUST_LOG still wins
    let default_level = if cli.run.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if !cli.run.execute()? {
        std::process::exit(1);
    }
    Ok(())
}
