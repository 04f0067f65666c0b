//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::debug;

/// mp - conversational event meal planner
#[derive(Parser)]
#[command(
    name = "mp",
    about = "Plan event menus, scale quantities and deliver shopping lists",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Scale one dish category for a guest count
    Scale {
        /// Quantity-table category (protein, side, dessert, ...)
        #[arg(short = 'C', long)]
        category: Option<String>,

        /// Number of adults
        #[arg(short, long)]
        adults: u32,

        /// Number of children
        #[arg(long, default_value = "0")]
        children: u32,

        /// Base-recipe quantity to scale
        #[arg(short, long)]
        base: Option<f64>,

        /// Servings the base recipe is written for (defaults to config)
        #[arg(short, long)]
        servings: Option<u32>,
    },

    /// Drive a full planning session from a YAML scenario
    Simulate {
        /// Scenario file
        scenario: PathBuf,

        /// Keep the session in the store after the run
        #[arg(long)]
        persist: bool,
    },

    /// Inspect stored sessions
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },
}

/// Session store subcommands
#[derive(Debug, Subcommand)]
pub enum SessionsCommand {
    /// List stored sessions, most recent first
    List {
        /// Output format
        #[arg(short, long, default_value = "text")]
        format: DisplayFormat,
    },

    /// Show one session
    Show {
        /// Session ID (or partial match)
        id: String,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: DisplayFormat,
    },

    /// Delete a session snapshot and its event log
    Delete {
        /// Session ID (or partial match)
        id: String,
    },
}

/// Output format for session commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DisplayFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for DisplayFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "DisplayFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for DisplayFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Where the binary writes its log file
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mealplan")
        .join("logs")
        .join("mealplan.log")
}
