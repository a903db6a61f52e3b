//! CLI command definitions for the `hubwire` binary.
//!
//! Each subcommand wires a small topology of components onto a hub, drives
//! it to completion, and returns a report for `main` to print.

pub mod kennel;
pub mod logger;
pub mod veggies;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use hubwire_observe::tracing_setup::LogFormat;

/// Run demo topologies on an in-process message hub.
#[derive(Parser)]
#[command(name = "hubwire", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Hub configuration file (TOML). Defaults apply when absent.
    #[arg(long, global = true, env = "HUBWIRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Suppress all log output except errors.
    #[arg(long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for bus lifecycle, -vv for every delivery).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Log line format.
    #[arg(long, global = true, value_enum, default_value_t = LogFormatArg::Text)]
    pub log_format: LogFormatArg,

    /// Export spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// The "I need veggies" exchange: a consumer asks, two producers answer.
    Veggies {
        /// How long the tomato producer takes to answer.
        #[arg(long, default_value_t = 50)]
        tomato_delay_ms: u64,

        /// How long the consumer waits before it stops eating.
        #[arg(long, default_value_t = 100)]
        deadline_ms: u64,
    },

    /// Add dogs to a kennel and list them through request/response.
    Kennel {
        /// Dog to add, as TYPE:NAME. Repeatable.
        #[arg(long = "add", value_name = "TYPE:NAME")]
        dogs: Vec<String>,

        /// Print the final list as JSON.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(arg: LogFormatArg) -> Self {
        match arg {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}
