use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process::Command;

const DEMO_SCENARIO: &str = "apps/assetstream-cli/scenarios/demo.yaml";

#[derive(Parser)]
#[command(name = "xtask", about = "Workspace automation for assetstream")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all checks: fmt, clippy, tests, doc
    Check,
    /// Run cargo fmt --check on all crates
    Fmt,
    /// Run clippy on all crates
    Clippy,
    /// Run all tests
    Test,
    /// Build rustdoc for the workspace
    Doc,
    /// Run the coordination cycle benchmark in release mode
    Bench,
    /// Run the bundled demo scenario through the CLI
    Demo {
        /// Number of coordination cycles
        #[arg(short, long, default_value = "120")]
        cycles: usize,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Check => {
            fmt()?;
            clippy()?;
            test()?;
            doc()?;
        }
        Commands::Fmt => fmt()?,
        Commands::Clippy => clippy()?,
        Commands::Test => test()?,
        Commands::Doc => doc()?,
        Commands::Bench => cargo(
            "cargo bench",
            &["bench", "-p", "assetstream-core", "--bench", "bench_stream_cycle"],
        )?,
        Commands::Demo { cycles } => {
            let cycles = cycles.to_string();
            cargo(
                "demo scenario",
                &[
                    "run",
                    "-p",
                    "assetstream-cli",
                    "--",
                    "run",
                    DEMO_SCENARIO,
                    "--cycles",
                    &cycles,
                ],
            )?
        }
    }

    Ok(())
}

fn fmt() -> Result<()> {
    cargo("cargo fmt --check", &["fmt", "--all", "--", "--check"])
}

fn clippy() -> Result<()> {
    cargo(
        "cargo clippy",
        &[
            "clippy",
            "--workspace",
            "--all-targets",
            "--",
            "-D",
            "warnings",
        ],
    )
}

fn test() -> Result<()> {
    cargo("cargo test", &["test", "--workspace"])
}

fn doc() -> Result<()> {
    cargo("cargo doc", &["doc", "--workspace", "--no-deps"])
}

fn cargo(label: &str, args: &[&str]) -> Result<()> {
    println!("==> Running {label}");
    let status = Command::new("cargo").args(args).status()?;
    if !status.success() {
        anyhow::bail!("{label} failed");
    }
    Ok(())
}
