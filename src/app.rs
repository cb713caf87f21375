//! Interview application entry points.
//!
//! Wires the real devices and the live endpoint into a [`SessionController`]
//! and drives it: queued session events, one-second countdown ticks,
//! animation-frame volume sampling and Ctrl-C as the user stop.

use crate::config::Config;
use crate::error::{Result, WajjihniError};
use crate::evaluation::{AnalysisResult, InterviewEvaluation, TextClient, evaluate_interview};
use crate::live::transport::LiveClient;
use crate::session::backend::DeviceBackend;
use crate::session::countdown::format_mmss;
use crate::session::prompt::{InterviewRequest, Transcript};
use crate::session::{EndReason, Phase, SessionController, SessionStatus, SessionSummary};
use owo_colors::OwoColorize;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};

/// Command-line overrides for one interview.
#[derive(Debug, Clone, Default)]
pub struct InterviewArgs {
    pub role: Option<String>,
    pub analysis: Option<PathBuf>,
    pub context: Option<String>,
    pub duration_secs: Option<u64>,
    pub voice: Option<String>,
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub no_transcripts: bool,
    pub no_evaluate: bool,
}

impl InterviewArgs {
    /// Applies the overrides on top of the loaded configuration.
    pub fn apply(&self, config: &mut Config) {
        if let Some(secs) = self.duration_secs {
            config.interview.duration_secs = secs;
        }
        if let Some(voice) = &self.voice {
            config.interview.voice = voice.clone();
        }
        if let Some(device) = &self.input_device {
            config.audio.input_device = Some(device.clone());
        }
        if let Some(device) = &self.output_device {
            config.audio.output_device = Some(device.clone());
        }
        if self.no_transcripts {
            config.interview.transcripts = false;
        }
        if self.no_evaluate {
            config.interview.evaluate = false;
        }
    }

    /// Builds the request from `--role`, or from the analysis file's first
    /// recommended role.
    pub fn request(&self) -> Result<InterviewRequest> {
        let role = match (&self.role, &self.analysis) {
            (Some(role), _) => role.clone(),
            (None, Some(path)) => {
                let text = std::fs::read_to_string(path)?;
                let analysis = AnalysisResult::from_json(&text)?;
                analysis.target_role().unwrap_or_default().to_string()
            }
            (None, None) => String::new(),
        };
        let request = InterviewRequest::new(role);
        Ok(match &self.context {
            Some(context) => request.with_context(context.clone()),
            None => request,
        })
    }
}

/// Run one live interview on the configured devices.
pub async fn run_interview_command(mut config: Config, args: InterviewArgs, quiet: bool) -> Result<()> {
    args.apply(&mut config);
    config.validate()?;

    let request = args.request()?;
    let Some(role) = request.target_role().map(str::to_string) else {
        eprintln!("No target role. Pass --role, or --analysis with a recommended role.");
        return Ok(());
    };

    let client = LiveClient::from_config(&config)?;
    let backend = DeviceBackend::new(client, config.audio.clone());
    let (mut controller, mut events) = SessionController::new(backend, config.clone());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    if !quiet {
        eprintln!("Connecting interview for {}...", role.bold());
    }

    // Ctrl-C while connecting abandons the start; stop() releases what was acquired
    let started = {
        let start = controller.start(request);
        tokio::select! {
            result = start => Some(result),
            _ = &mut ctrl_c => None,
        }
    };
    match started {
        None => {
            controller.stop();
            eprintln!("Cancelled.");
            return Ok(());
        }
        Some(Err(e)) => {
            if e.is_startup_failure() && !quiet {
                eprintln!("Could not start the interview. Check the audio devices and the API key.");
            }
            return Err(e);
        }
        Some(Ok(_)) => {}
    }

    let mut tick = tokio::time::interval_at(
        Instant::now() + Duration::from_secs(1),
        Duration::from_secs(1),
    );
    let mut frame = tokio::time::interval(Duration::from_secs_f64(
        1.0 / config.audio.volume_fps as f64,
    ));
    frame.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut status_line = StatusLine::new(quiet);

    let summary = loop {
        tokio::select! {
            Some(dispatch) = events.recv() => {
                if let Some(summary) = controller.dispatch(dispatch) {
                    break summary;
                }
            }
            _ = tick.tick() => {
                if let Some(summary) = controller.tick() {
                    break summary;
                }
            }
            _ = frame.tick() => {
                controller.animation_frame();
                status_line.render(&controller.status());
            }
            _ = &mut ctrl_c => {
                match controller.stop() {
                    Some(summary) => break summary,
                    None => return Ok(()),
                }
            }
        }
    };
    status_line.clear();

    report_summary(&summary, quiet);
    if config.interview.evaluate && !summary.transcript.is_empty() {
        let evaluation = evaluate(&config, &summary.transcript, &summary.role, quiet).await?;
        print_evaluation(&evaluation);
    }

    match summary.reason {
        EndReason::Failed(message) => Err(WajjihniError::Other(message)),
        _ => Ok(()),
    }
}

/// Score a saved transcript.
pub async fn run_evaluate_command(config: Config, role: &str, transcript: PathBuf, quiet: bool) -> Result<()> {
    let text = std::fs::read_to_string(&transcript)?;
    let transcript = Transcript::parse(&text);
    let evaluation = evaluate(&config, &transcript, role, quiet).await?;
    print_evaluation(&evaluation);
    Ok(())
}

async fn evaluate(
    config: &Config,
    transcript: &Transcript,
    role: &str,
    quiet: bool,
) -> Result<InterviewEvaluation> {
    let client = TextClient::from_config(config)?;
    if !quiet {
        eprintln!("Evaluating interview...");
    }
    Ok(evaluate_interview(&client, transcript, role).await)
}

fn report_summary(summary: &SessionSummary, quiet: bool) {
    if !quiet {
        let reason = summary.reason.to_string();
        match summary.reason {
            EndReason::UserStopped | EndReason::TimedOut => {
                eprintln!("Interview ended: {}", reason.green())
            }
            _ => eprintln!("Interview ended: {}", reason.red()),
        }
    }
    // Transcript goes to stdout so it can be saved and evaluated later
    if !summary.transcript.is_empty() {
        println!("{}", summary.transcript.render());
    }
}

fn print_evaluation(evaluation: &InterviewEvaluation) {
    let score = format!("{}/100", evaluation.score);
    let score = if evaluation.score >= 70 {
        score.green().bold().to_string()
    } else if evaluation.score >= 40 {
        score.yellow().bold().to_string()
    } else {
        score.red().bold().to_string()
    };
    eprintln!("\nScore: {}", score);
    eprintln!("{}", evaluation.feedback);
    if !evaluation.strengths.is_empty() {
        eprintln!("\n{}", "Strengths".bold());
        for item in &evaluation.strengths {
            eprintln!("  + {}", item);
        }
    }
    if !evaluation.improvements.is_empty() {
        eprintln!("\n{}", "To improve".bold());
        for item in &evaluation.improvements {
            eprintln!("  - {}", item);
        }
    }
}

/// Single-line live status on stderr, redrawn only when it changes.
struct StatusLine {
    quiet: bool,
    last: String,
}

/// Width of the volume meter in cells.
const METER_WIDTH: usize = 12;

impl StatusLine {
    fn new(quiet: bool) -> Self {
        Self {
            quiet,
            last: String::new(),
        }
    }

    fn render(&mut self, status: &SessionStatus) {
        if self.quiet {
            return;
        }
        let line = format_status(status);
        if line == self.last {
            return;
        }
        let mut stderr = std::io::stderr().lock();
        if write!(stderr, "\r\x1b[2K{}", line).and_then(|_| stderr.flush()).is_err() {
            self.quiet = true;
        }
        self.last = line;
    }

    fn clear(&mut self) {
        if !self.quiet && !self.last.is_empty() {
            eprint!("\r\x1b[2K");
        }
        self.last.clear();
    }
}

fn format_status(status: &SessionStatus) -> String {
    let time = format_mmss(status.remaining);
    let phase = match status.phase {
        Phase::Connecting => "connecting".yellow().to_string(),
        Phase::Active if status.agent_speaking => "interviewer speaking".cyan().to_string(),
        Phase::Active => "listening".green().to_string(),
        other => other.to_string(),
    };
    let filled = ((status.volume / 255.0) * METER_WIDTH as f32).round() as usize;
    let filled = filled.min(METER_WIDTH);
    let meter = format!("{}{}", "▮".repeat(filled), "▯".repeat(METER_WIDTH - filled));
    format!("{}  {}  {}", time.bold(), meter, phase)
}
