//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// ElasticGoose - elastic training state tools
#[derive(Parser)]
#[command(
    name = "eg",
    about = "Checkpoint, restore and sync of training state for elastic workers",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/elasticgoose/logs/elasticgoose.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Run host discovery once and print the result
    Hosts {
        /// Discovery command (overrides the configured script)
        #[arg(short, long)]
        script: Option<String>,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Bind a free port from the configured range and print it
    Port,

    /// Run an in-process elastic training simulation
    Simulate {
        /// Number of workers
        #[arg(short, long, default_value = "3")]
        workers: usize,

        /// Number of epochs
        #[arg(short, long, default_value = "5")]
        epochs: usize,

        /// Epoch at which a node failure is injected
        #[arg(long)]
        fail_at: Option<usize>,
    },
}

/// Output format for listing commands
#[derive(Clone, Debug, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Path of the log file written by the binary
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("elasticgoose")
        .join("logs")
        .join("elasticgoose.log")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parse_no_command() {
        let cli = Cli::parse_from(["eg"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_parse_hosts() {
        let cli = Cli::parse_from(["eg", "hosts", "--script", "echo a:2", "--format", "json"]);
        if let Some(Command::Hosts { script, format }) = cli.command {
            assert_eq!(script.as_deref(), Some("echo a:2"));
            assert!(matches!(format, OutputFormat::Json));
        } else {
            panic!("Expected Hosts command");
        }
    }

    #[test]
    fn test_cli_parse_simulate() {
        let cli = Cli::parse_from(["eg", "simulate", "--workers", "4", "--epochs", "3", "--fail-at", "2"]);
        if let Some(Command::Simulate {
            workers,
            epochs,
            fail_at,
        }) = cli.command
        {
            assert_eq!(workers, 4);
            assert_eq!(epochs, 3);
            assert_eq!(fail_at, Some(2));
        } else {
            panic!("Expected Simulate command");
        }
    }

    #[test]
    fn test_cli_parse_port() {
        let cli = Cli::parse_from(["eg", "port"]);
        assert!(matches!(cli.command, Some(Command::Port)));
    }

    #[test]
    fn test_output_format_from_str() {
        assert!(matches!("text".parse::<OutputFormat>(), Ok(OutputFormat::Text)));
        assert!(matches!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json)));
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_cli_with_config() {
        let cli = Cli::parse_from(["eg", "-c", "/path/to/config.yml", "port"]);
        assert_eq!(cli.config, Some(PathBuf::from("/path/to/config.yml")));
    }

    #[test]
    fn test_log_path() {
        assert!(get_log_path().ends_with("elasticgoose/logs/elasticgoose.log"));
    }
}
