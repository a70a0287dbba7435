//! Configuration and CLI argument handling

use std::path::PathBuf;

use clap::Parser;

/// CLI argument parsing structure
#[derive(Parser, Debug)]
#[command(name = "kitchen-timers")]
#[command(about = "A persistent multi-timer engine for kitchen countdowns")]
#[command(version)]
pub struct Config {
    /// Port to bind the server to
    #[arg(short, long, default_value = "20554")]
    pub port: u16,

    /// Host address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// SQLite database holding the timers
    #[arg(short, long, default_value = "timers.db")]
    pub database: PathBuf,

    /// Program run as `<program> <title> <body>` when an alert fires (e.g. notify-send)
    #[arg(long)]
    pub notify_command: Option<String>,

    /// Log completions instead of ringing the terminal bell
    #[arg(long)]
    pub no_bell: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Parse configuration from command line arguments
    pub fn parse() -> Self {
        Parser::parse()
    }

    /// Get the server address as a formatted string
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the appropriate log level based on verbose flag
    pub fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else {
            "info"
        }
    }
}
