//! Command-line interface for wajjihni
//!
//! Provides argument parsing using clap derive macros.

use clap::{Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// Career guidance with a live voice mock interview
#[derive(Parser, Debug)]
#[command(
    name = "wajjihni",
    version,
    about = "Career guidance with a live voice mock interview"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Suppress status output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: debug, -vv: trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a live voice interview
    Interview {
        /// Target job role (e.g., "Backend Engineer")
        #[arg(long, value_name = "ROLE", conflicts_with = "analysis")]
        role: Option<String>,

        /// Profile analysis JSON; its first recommended role is used
        #[arg(long, value_name = "FILE")]
        analysis: Option<PathBuf>,

        /// Candidate background passed to the interviewer
        #[arg(long, value_name = "TEXT")]
        context: Option<String>,

        /// Interview length (default: 15m). Examples: 900, 20m, 1h
        #[arg(long, short = 'd', value_name = "DURATION", value_parser = parse_duration_secs)]
        duration: Option<u64>,

        /// Interviewer voice (default: Zephyr)
        #[arg(long, value_name = "NAME")]
        voice: Option<String>,

        /// Microphone device name
        #[arg(long, value_name = "DEVICE")]
        input_device: Option<String>,

        /// Speaker device name
        #[arg(long, value_name = "DEVICE")]
        output_device: Option<String>,

        /// Do not request transcripts from the endpoint
        #[arg(long)]
        no_transcripts: bool,

        /// Skip the post-call evaluation
        #[arg(long)]
        no_evaluate: bool,
    },

    /// List audio input and output devices
    Devices,

    /// Evaluate a saved interview transcript
    Evaluate {
        /// Role the interview was for
        #[arg(long, value_name = "ROLE")]
        role: String,

        /// Transcript file, one "Speaker: text" line per turn
        #[arg(long, value_name = "FILE")]
        transcript: PathBuf,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

/// Configuration management actions
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the configuration file path
    Path,
}

/// Parse a duration string into seconds.
///
/// Supports bare numbers (seconds) and any format accepted by `humantime`
/// (`15m`, `900s`, `1h30m`).
fn parse_duration_secs(s: &str) -> Result<u64, String> {
    let s = s.trim();
    let secs = match s.parse::<u64>() {
        Ok(secs) => secs,
        Err(_) => humantime::parse_duration(s)
            .map(|d| d.as_secs())
            .map_err(|e| e.to_string())?,
    };
    if secs == 0 {
        return Err("duration must be at least one second".to_string());
    }
    Ok(secs)
}
