use crate::context::JobContext;
use crate::engine::{HttpJobApi, JobApi};
use crate::logging::{self, LogLevel, LogTarget};
use crate::model::{
    ControllerConfig, ControllerEvent, RunOutcome, StartOutcome, StopOutcome, DEFAULT_BASE_URL,
};
use crate::orchestrator::{spawn_controller, spawn_status_reconciler};
use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output routing for the stdout/stderr writer.
enum OutputLine {
    /// Transcript text, written as-is (fragments need not end in a newline).
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = stdout.lock();
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(text) => {
                    let _ = out.write_all(text.as_bytes());
                    let _ = out.flush();
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "job-runner",
    version,
    about = "Start, stream, stop and monitor jobs on a job-execution server"
)]
pub struct Cli {
    /// Base URL of the job-execution server
    #[arg(long, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Job file the server should execute (defaults to graph.json)
    #[arg(long)]
    pub file: Option<String>,

    /// How often to ask the server whether a job is running
    #[arg(long, default_value = "1s")]
    pub poll_interval: humantime::Duration,

    /// Clear the transcript whenever a new run starts
    #[arg(long)]
    pub clear_on_start: bool,

    /// Run the job headless: stream its output to stdout and exit when it ends
    #[arg(long)]
    pub text: bool,

    /// Print the server's run status as JSON and exit
    #[arg(long, conflicts_with_all = ["text", "stop"])]
    pub status: bool,

    /// Ask the server to stop the current job, print its reply and exit
    #[arg(long, conflicts_with = "text")]
    pub stop: bool,

    /// Log level (overrides JOB_RUNNER_LOG)
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Log file for the terminal UI (default: <cache dir>/job-runner/job-runner.log)
    #[arg(long)]
    pub log_file: Option<std::path::PathBuf>,
}

impl Cli {
    fn uses_tui(&self) -> bool {
        cfg!(feature = "tui") && !self.text && !self.status && !self.stop
    }
}

pub async fn run(args: Cli) -> Result<()> {
    if args.uses_tui() {
        let path = args
            .log_file
            .clone()
            .unwrap_or_else(logging::default_log_file);
        logging::init_logging(args.log_level, LogTarget::File(&path))?;
    } else {
        logging::init_logging(args.log_level, LogTarget::Stderr)?;
    }

    let cfg = build_config(&args)?;
    tracing::debug!(
        config = %serde_json::to_string(&cfg).unwrap_or_default(),
        "configuration loaded"
    );
    let api = Arc::new(HttpJobApi::new(&cfg)?);

    let mut ctx = JobContext::default();
    if let Some(file) = args.file.as_deref() {
        ctx.set_filename(file);
    }

    if args.status {
        return print_status(api.as_ref()).await;
    }
    if args.stop {
        return stop_once(api.as_ref()).await;
    }

    if !args.text {
        #[cfg(feature = "tui")]
        {
            return crate::tui::run(&cfg, api, &ctx).await;
        }
    }

    run_text(&cfg, api, &ctx).await
}

/// Build a `ControllerConfig` from CLI arguments.
pub fn build_config(args: &Cli) -> Result<ControllerConfig> {
    let poll_interval = Duration::from(args.poll_interval);
    if poll_interval.is_zero() {
        anyhow::bail!("--poll-interval must be greater than zero");
    }
    reqwest::Url::parse(&args.base_url)
        .with_context(|| format!("--base-url is not a valid URL: {}", args.base_url))?;

    Ok(ControllerConfig {
        base_url: args.base_url.clone(),
        poll_interval,
        clear_on_start: args.clear_on_start,
        ..ControllerConfig::default()
    })
}

async fn print_status(api: &HttpJobApi) -> Result<()> {
    let reply = api
        .status()
        .await
        .with_context(|| format!("status query to {} failed", api.base_url()))?;
    println!("{}", serde_json::to_string(&reply)?);
    Ok(())
}

async fn stop_once(api: &HttpJobApi) -> Result<()> {
    let reply = api
        .stop()
        .await
        .with_context(|| format!("stop request to {} failed", api.base_url()))?;
    println!("{}", reply.trim_end());
    Ok(())
}

/// Headless run: transcript to stdout, alerts to stderr, Ctrl-C cancels.
async fn run_text(cfg: &ControllerConfig, api: Arc<HttpJobApi>, ctx: &JobContext) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let (controller, mut events, _task) = spawn_controller(api.clone(), cfg.clear_on_start);
    let poll = spawn_status_reconciler(api, controller.clone(), cfg.poll_interval);

    let forward = |ev: ControllerEvent| match ev {
        ControllerEvent::Output(text) => {
            let _ = out_tx.send(OutputLine::Stdout(text));
        }
        ControllerEvent::Alert(msg) => {
            let _ = out_tx.send(OutputLine::Stderr(format!("Error: {msg}")));
        }
        ControllerEvent::PhaseChanged { phase } => {
            tracing::debug!(phase = phase.label(), "phase changed");
        }
        ControllerEvent::RunFinished { .. } => {}
    };

    let descriptor = ctx.descriptor();
    let outcome = match controller.start(descriptor.clone()).await {
        Ok(StartOutcome::Started) => {
            tracing::info!(job = %descriptor, "job started");
            loop {
                tokio::select! {
                    ev = events.recv() => match ev {
                        Some(ControllerEvent::RunFinished { outcome }) => break outcome,
                        Some(other) => forward(other),
                        None => break RunOutcome::Failed("controller stopped unexpectedly".into()),
                    },
                    _ = tokio::signal::ctrl_c() => {
                        let res = controller
                            .cancel(|| tracing::info!("interrupted, closing"))
                            .await;
                        let outcome = match res {
                            Ok(StopOutcome::Stopped { .. } | StopOutcome::NotRunning) => RunOutcome::Completed,
                            Err(e) => RunOutcome::Failed(e.to_string()),
                        };
                        break outcome;
                    }
                }
            }
        }
        Ok(StartOutcome::AlreadyRunning) => {
            RunOutcome::Failed("a job is already running on the server".into())
        }
        Err(e) => RunOutcome::Failed(e.to_string()),
    };

    poll.cancel();
    let snap = controller.snapshot();
    tracing::debug!(
        phase = controller.phase().label(),
        transcript_bytes = snap.output.len(),
        last_error = snap.last_error.as_deref().unwrap_or(""),
        "headless run finished"
    );
    while let Ok(ev) = events.try_recv() {
        forward(ev);
    }
    let _ = out_tx.send(OutputLine::Stdout("\n".into()));
    drop(out_tx);
    let _ = out_handle.await;

    match outcome {
        RunOutcome::Completed => Ok(()),
        RunOutcome::Failed(reason) => Err(anyhow::anyhow!("run of {descriptor} failed: {reason}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_local_server() {
        let args = Cli::parse_from(["job-runner"]);
        let cfg = build_config(&args).unwrap();
        assert_eq!(cfg.base_url, "http://127.0.0.1:5000");
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert!(!cfg.clear_on_start);
        assert!(cfg.user_agent.starts_with("job-runner/"));
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let args = Cli::parse_from(["job-runner", "--poll-interval", "0s"]);
        assert!(build_config(&args).is_err());
    }

    #[test]
    fn status_and_text_conflict() {
        assert!(Cli::try_parse_from(["job-runner", "--status", "--text"]).is_err());
    }

    #[test]
    fn one_shot_modes_skip_the_tui() {
        let args = Cli::parse_from(["job-runner", "--stop"]);
        assert!(!args.uses_tui());
        let args = Cli::parse_from(["job-runner", "--text", "--file", "etl.json"]);
        assert!(!args.uses_tui());
        assert_eq!(args.file.as_deref(), Some("etl.json"));
    }
}
