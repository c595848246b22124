use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for agentsim")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all checks: fmt, clippy, tests, doc, replay smoke test
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates
    Clippy,
    /// Run all tests
    Test,
    /// Build rustdoc for the workspace
    Doc,
    /// Run `agentsim verify` over a spread of seeds
    Replay {
        /// Ticks per verification run
        #[arg(short, long, default_value = "50")]
        ticks: u64,
    },
}

/// Seeds exercised by the replay smoke test.
const REPLAY_SEEDS: [u64; 4] = [0, 1, 42, 18_446_744_073_709_551_615];

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            run_fmt()?;
            run_clippy()?;
            run_tests()?;
            run_doc()?;
            run_replay(20)?;
        }
        Commands::Fmt => run_fmt()?,
        Commands::Clippy => run_clippy()?,
        Commands::Test => run_tests()?,
        Commands::Doc => run_doc()?,
        Commands::Replay { ticks } => run_replay(ticks)?,
    }

    Ok(())
}

fn cargo(step: &str, args: &[&str]) -> Result<()> {
    println!("==> {step}: cargo {}", args.join(" "));
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{step} failed");
    }
    Ok(())
}

fn run_fmt() -> Result<()> {
    cargo("fmt", &["fmt", "--all", "--", "--check"])
}

fn run_clippy() -> Result<()> {
    cargo(
        "clippy",
        &["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
    )
}

fn run_tests() -> Result<()> {
    cargo("test", &["test", "--workspace"])
}

fn run_doc() -> Result<()> {
    cargo("doc", &["doc", "--workspace", "--no-deps"])
}

fn run_replay(ticks: u64) -> Result<()> {
    let ticks = ticks.to_string();
    for seed in REPLAY_SEEDS {
        let seed = seed.to_string();
        cargo(
            "replay",
            &[
                "run", "-q", "-p", "agentsim-cli", "--", "verify", "--seed", &seed, "--ticks",
                &ticks, "--agents", "4",
            ],
        )?;
    }
    Ok(())
}
