//! kwatch: print one line per change to a Kubernetes collection.
//!
//! # Usage
//!
//! ```text
//! kwatch watch --resource <kind> [-n <namespace>] [--jsonpath <template>] [--resync <secs>]
//! kwatch eval --jsonpath <template> [<file>|-] [--items]
//! kwatch kinds [--json]
//! ```
//!
//! Event lines go to stdout; logs go to stderr.

mod commands;
mod kubeconfig;
mod transport;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{eval::EvalArgs, kinds::KindsArgs, watch::WatchArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "kwatch",
    version,
    about = "Watch a Kubernetes collection and print add/update/delete lines",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Mirror a collection and print one line per change until interrupted.
    Watch(WatchArgs),

    /// Render a JSONPath template against a JSON or YAML document.
    Eval(EvalArgs),

    /// List the resources that can be watched.
    Kinds(KindsArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Watch(args) => args.run(),
        Commands::Eval(args) => args.run(),
        Commands::Kinds(args) => args.run(),
    }
}
