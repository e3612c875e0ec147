//! datctl
//!
//! Command-line tool for inspecting and editing block containers.

use std::fs;
use std::path::PathBuf;
use std::process;

use blockdat::config::DEFAULT_BLOCK_SIZE;
use blockdat::{Config, Container, DatError, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

/// Block container tool
#[derive(Parser, Debug)]
#[command(name = "datctl")]
#[command(about = "Inspect and edit block-chained record containers")]
#[command(version)]
struct Args {
    /// Container file
    #[arg(short, long, default_value = "./portal.dat")]
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a new, empty container
    Create {
        /// Block size in bytes (pointer included)
        #[arg(short, long, default_value_t = DEFAULT_BLOCK_SIZE)]
        block_size: u32,
    },

    /// Print the header
    Info,

    /// List every directory entry
    List,

    /// Write a record's bytes to a file
    Get {
        /// Record key (hex, e.g. 0x41000000)
        #[arg(value_parser = parse_key)]
        key: u32,

        /// Output path
        output: PathBuf,
    },

    /// Add a record from a file
    Insert {
        #[arg(value_parser = parse_key)]
        key: u32,

        /// Input path
        input: PathBuf,
    },

    /// Replace a record's bytes with a file's contents
    Replace {
        #[arg(value_parser = parse_key)]
        key: u32,

        /// Input path
        input: PathBuf,
    },

    /// Remove a record
    Remove {
        #[arg(value_parser = parse_key)]
        key: u32,
    },

    /// Verify structural invariants
    Check,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,blockdat=debug"));

    fmt().with_env_filter(filter).with_target(true).init();

    let args = Args::parse();

    if let Err(e) = run(args) {
        tracing::error!("{}", e);
        process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    if let Commands::Create { block_size } = args.command {
        let config = Config::builder().path(&args.file).block_size(block_size).build();
        return Container::create(config)?.close();
    }

    let mut container = Container::open_path(&args.file)?;

    match args.command {
        // Handled above
        Commands::Create { .. } => {}
        Commands::Info => {
            println!("file: {}, {}", args.file.display(), container.header());
            if let Some(version) = container.data_version()? {
                println!("dataVersion: {}", version);
            }
        }
        Commands::List => {
            for entry in container.entries()? {
                println!("{}", entry);
            }
        }
        Commands::Get { key, output } => match container.read(key)? {
            Some(data) => {
                fs::write(&output, &data)?;
                tracing::info!("Wrote {} bytes to {}", data.len(), output.display());
            }
            None => return Err(DatError::KeyNotFound(key)),
        },
        Commands::Insert { key, input } => {
            let data = fs::read(&input)?;
            println!("{}", container.insert(key, &data)?);
        }
        Commands::Replace { key, input } => {
            let data = fs::read(&input)?;
            println!("{}", container.replace(key, &data)?);
        }
        Commands::Remove { key } => {
            println!("{}", container.remove(key)?);
        }
        Commands::Check => {
            let report = container.check()?;
            println!("{:#?}", report);
        }
    }

    container.close()
}

/// Parse a key given in hex, with or without a `0x` prefix
fn parse_key(s: &str) -> std::result::Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|e| format!("invalid key '{}': {}", s, e))
}
