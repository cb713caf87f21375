use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;
use wajjihni::app::{InterviewArgs, run_evaluate_command, run_interview_command};
use wajjihni::audio::device::{Direction, list_devices};
use wajjihni::cli::{Cli, Commands, ConfigAction};
use wajjihni::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose);
    tracing::debug!("wajjihni {}", wajjihni::version_string());

    match cli.command {
        Commands::Interview {
            role,
            analysis,
            context,
            duration,
            voice,
            input_device,
            output_device,
            no_transcripts,
            no_evaluate,
        } => {
            let config = load_config(cli.config.as_deref())?;
            let args = InterviewArgs {
                role,
                analysis,
                context,
                duration_secs: duration,
                voice,
                input_device,
                output_device,
                no_transcripts,
                no_evaluate,
            };
            run_interview_command(config, args, cli.quiet).await?;
        }
        Commands::Devices => {
            list_audio_devices()?;
        }
        Commands::Evaluate { role, transcript } => {
            let config = load_config(cli.config.as_deref())?;
            run_evaluate_command(config, &role, transcript, cli.quiet).await?;
        }
        Commands::Config { action } => {
            handle_config_command(action, cli.config.as_deref())?;
        }
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "wajjihni", &mut std::io::stdout());
        }
    }

    Ok(())
}

/// Logs go to stderr; stdout carries transcripts and command output.
///
/// `RUST_LOG` wins over the verbosity flags when set.
fn init_tracing(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "wajjihni=debug",
        (false, _) => "wajjihni=trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .with_target(verbose > 0)
        .init();
}

fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = match custom_path {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default(&Config::default_path()?)?,
    };
    Ok(config.with_env_overrides())
}

fn list_audio_devices() -> Result<()> {
    for (label, direction) in [("input", Direction::Input), ("output", Direction::Output)] {
        let devices = list_devices(direction)?;
        if devices.is_empty() {
            println!("No audio {} devices found", label);
            continue;
        }
        println!("Available audio {} devices:", label);
        for (idx, device) in devices.iter().enumerate() {
            println!("  [{}] {}", idx, device);
        }
    }
    Ok(())
}

fn handle_config_command(action: ConfigAction, custom_path: Option<&std::path::Path>) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let mut config = load_config(custom_path)?;
            if config.api.api_key.as_deref().is_some_and(|k| !k.is_empty()) {
                config.api.api_key = Some("<set>".to_string());
            }
            print!("{}", toml::to_string(&config)?);
        }
        ConfigAction::Path => match custom_path {
            Some(path) => println!("{}", path.display()),
            None => println!("{}", Config::default_path()?.display()),
        },
    }
    Ok(())
}
