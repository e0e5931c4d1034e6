use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::process::Command;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "x")]
#[command(about = "Development automation for ember-core")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run all CI checks (fmt, clippy, build, test)
    Ci,
    /// Quick checks before commit (fmt, clippy)
    Check,
    /// Format code
    Fmt {
        #[arg(long)]
        check: bool,
    },
    /// Run clippy
    Clippy {
        #[arg(long)]
        fix: bool,
    },
    /// Build the workspace
    Build {
        #[arg(long)]
        release: bool,
    },
    /// Run tests
    Test {
        /// Run only one module's tests (e.g. cpu, gpu, spu, cdrom)
        #[arg(long)]
        module: Option<String>,
    },
    /// Run benchmarks
    Bench,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Ci => {
            run_step("fmt", &["fmt", "--all", "--", "--check"])?;
            run_step(
                "clippy",
                &["clippy", "--workspace", "--", "-D", "warnings"],
            )?;
            run_step("build", &["build", "--workspace"])?;
            run_step("test", &["test", "--workspace"])?;
            println!("{}", "all CI checks passed".green().bold());
        }
        Commands::Check => {
            run_step("fmt", &["fmt", "--all", "--", "--check"])?;
            run_step(
                "clippy",
                &["clippy", "--workspace", "--", "-D", "warnings"],
            )?;
        }
        Commands::Fmt { check } => {
            if check {
                run_step("fmt", &["fmt", "--all", "--", "--check"])?;
            } else {
                run_step("fmt", &["fmt", "--all"])?;
            }
        }
        Commands::Clippy { fix } => {
            if fix {
                run_step("clippy", &["clippy", "--workspace", "--fix", "--allow-dirty"])?;
            } else {
                run_step(
                    "clippy",
                    &["clippy", "--workspace", "--", "-D", "warnings"],
                )?;
            }
        }
        Commands::Build { release } => {
            if release {
                run_step("build", &["build", "--workspace", "--release"])?;
            } else {
                run_step("build", &["build", "--workspace"])?;
            }
        }
        Commands::Test { module } => match module {
            Some(module) => {
                let filter = format!("core::{}", module);
                run_step("test", &["test", &filter])?;
            }
            None => run_step("test", &["test", "--workspace"])?,
        },
        Commands::Bench => run_step("bench", &["bench"])?,
    }

    Ok(())
}

fn run_step(name: &str, args: &[&str]) -> Result<()> {
    println!("{} cargo {}", "running".cyan().bold(), args.join(" "));
    let started = Instant::now();

    let status = Command::new("cargo").args(args).status()?;

    if !status.success() {
        bail!("{} failed", name);
    }

    println!(
        "{} {} ({:.1}s)",
        "ok".green().bold(),
        name,
        started.elapsed().as_secs_f32()
    );
    Ok(())
}
