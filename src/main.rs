//! Fall Guard CLI
//!
//! Fall detection and alert vetting for body-worn motion sensors.

use anyhow::{bail, Context};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use clap::{Parser, Subcommand};
use fall_guard_agent::{
    audit::{create_shared_log_with_persistence, SharedAuditLog},
    config::Config,
    delivery::{AlertSink, JsonlSink, TracingSink},
    monitor::Monitor,
    runtime::Runtime,
    source::{load_samples, save_samples, Scenario, SimulatedSource, SourceConfig},
    Alert, AlertState, SensorSample, SubjectId, VERSION,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "fall-guard")]
#[command(version = VERSION)]
#[command(about = "Fall detection and alert vetting for body-worn motion sensors", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted scenario through the pipeline on a virtual clock
    Simulate {
        #[arg(long, value_enum, default_value = "fall")]
        scenario: Scenario,

        #[arg(long, default_value = "sim-subject")]
        subject: String,

        /// Start of the virtual clock (RFC 3339); defaults to now
        #[arg(long)]
        start: Option<DateTime<Utc>>,

        /// Cancel the pending alert this many seconds after it is raised
        #[arg(long)]
        cancel_after: Option<f64>,

        /// Append delivered and archived alerts to a JSON Lines file
        #[arg(long)]
        archive: Option<PathBuf>,
    },

    /// Replay a JSON Lines recording through the pipeline
    Replay {
        #[arg(long, short)]
        input: PathBuf,

        #[arg(long, default_value = "replay-subject")]
        subject: String,

        #[arg(long)]
        archive: Option<PathBuf>,
    },

    /// Write a scripted scenario as a JSON Lines recording
    Record {
        #[arg(long, value_enum, default_value = "fall")]
        scenario: Scenario,

        #[arg(long, short)]
        output: PathBuf,

        /// Sample rate (Hz); defaults to the configured rate
        #[arg(long)]
        rate: Option<f64>,
    },

    /// Monitor a live simulated wearer until interrupted
    Monitor {
        #[arg(long, value_enum, default_value = "walking")]
        scenario: Scenario,

        #[arg(long, default_value = "live-subject")]
        subject: String,

        /// Stop after this many seconds
        #[arg(long)]
        duration: Option<u64>,

        #[arg(long)]
        archive: Option<PathBuf>,
    },

    /// Show cumulative processing statistics
    Status,

    /// Show configuration
    Config,

    /// Validate the configuration and every subject override
    Validate,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Simulate {
            scenario,
            subject,
            start,
            cancel_after,
            archive,
        } => cmd_simulate(
            config,
            scenario,
            SubjectId::from(subject),
            start.unwrap_or_else(Utc::now),
            cancel_after,
            archive,
        ),
        Commands::Replay {
            input,
            subject,
            archive,
        } => cmd_replay(config, &input, SubjectId::from(subject), archive),
        Commands::Record {
            scenario,
            output,
            rate,
        } => cmd_record(&config, scenario, &output, rate),
        Commands::Monitor {
            scenario,
            subject,
            duration,
            archive,
        } => cmd_monitor(config, scenario, SubjectId::from(subject), duration, archive),
        Commands::Status => cmd_status(&config),
        Commands::Config => cmd_config(&config),
        Commands::Validate => cmd_validate(&config),
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Config::load().context("loading configuration"),
    }
}

fn alert_sink(archive: Option<PathBuf>) -> anyhow::Result<Arc<dyn AlertSink>> {
    match archive {
        Some(path) => {
            let sink = JsonlSink::open(&path)
                .with_context(|| format!("opening alert archive {}", path.display()))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(TracingSink)),
    }
}

fn session_audit(config: &Config) -> SharedAuditLog {
    if let Err(e) = config.ensure_directories() {
        warn!("could not create data directories: {e}");
    }
    create_shared_log_with_persistence(config.data_path.join("audit.json"))
}

fn cmd_simulate(
    config: Config,
    scenario: Scenario,
    subject: SubjectId,
    start: DateTime<Utc>,
    cancel_after: Option<f64>,
    archive: Option<PathBuf>,
) -> anyhow::Result<()> {
    let samples = scenario.builder().build(config.sampling.sample_rate_hz, start);
    println!("Fall Guard v{VERSION}");
    println!(
        "Simulating {:?} for subject {subject}: {} samples from {}",
        scenario,
        samples.len(),
        start.to_rfc3339()
    );
    println!();
    run_offline(config, subject, samples, cancel_after, archive)
}

fn cmd_replay(
    config: Config,
    input: &Path,
    subject: SubjectId,
    archive: Option<PathBuf>,
) -> anyhow::Result<()> {
    let samples = load_samples(input)
        .with_context(|| format!("reading recording {}", input.display()))?;
    println!("Replaying {} samples from {}", samples.len(), input.display());
    println!();
    run_offline(config, subject, samples, None, archive)
}

/// Feed `samples` through a single-subject monitor, then advance the clock
/// past the cancellation window so pending alerts resolve.
fn run_offline(
    config: Config,
    subject: SubjectId,
    samples: Vec<SensorSample>,
    cancel_after: Option<f64>,
    archive: Option<PathBuf>,
) -> anyhow::Result<()> {
    let audit = session_audit(&config);
    let window = config.subject(subject.as_str()).policy.cancellation_window;
    let mut monitor = Monitor::new(config, alert_sink(archive)?)
        .context("invalid configuration")?
        .with_risk_sink(Arc::new(TracingSink))
        .with_audit(Arc::clone(&audit));
    monitor.register(subject.clone())?;

    let mut scheduled_cancel: Option<(Uuid, DateTime<Utc>)> = None;
    let mut last_ts = None;

    for sample in samples {
        if let Some((alert_id, at)) = scheduled_cancel {
            if at <= sample.timestamp {
                report_cancel(&mut monitor, alert_id, &subject, at);
                scheduled_cancel = None;
            }
        }

        let outcome = match monitor.feed(&subject, sample) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(subject = %subject, "{e}");
                continue;
            }
        };
        last_ts = Some(sample.timestamp);

        if let Some(transition) = outcome.output.as_ref().and_then(|o| o.transition.as_ref()) {
            println!(
                "[{}] {} -> {} ({})",
                transition.at.format("%H:%M:%S%.3f"),
                transition.from,
                transition.to,
                transition.reason
            );
        }
        if let Some(alert) = outcome.alert {
            print_alert("raised", &alert);
            if let (Some(secs), AlertState::Pending) = (cancel_after, alert.state) {
                let delay = ChronoDuration::milliseconds((secs * 1000.0).round() as i64);
                scheduled_cancel = Some((alert.id, alert.created_at + delay));
            }
        }
        for alert in outcome.confirmed {
            print_alert("confirmed", &alert);
        }
    }

    let Some(last_ts) = last_ts else {
        bail!("no samples were accepted");
    };
    if let Some((alert_id, at)) = scheduled_cancel {
        report_cancel(&mut monitor, alert_id, &subject, at);
    }

    let window = ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::seconds(10));
    let settle = last_ts + window + ChronoDuration::seconds(1);
    for alert in monitor.tick(settle) {
        print_alert("confirmed", &alert);
    }

    for snapshot in monitor.snapshots() {
        println!();
        println!(
            "{}",
            serde_json::to_string_pretty(&snapshot).context("serializing snapshot")?
        );
    }

    if let Err(e) = audit.save() {
        warn!("could not save audit log: {e}");
    }
    println!();
    println!("{}", audit.summary());
    Ok(())
}

fn report_cancel(monitor: &mut Monitor, alert_id: Uuid, subject: &SubjectId, at: DateTime<Utc>) {
    match monitor.cancel(alert_id, subject, at) {
        Ok(()) => println!("[{}] alert {alert_id} cancelled by wearer", at.format("%H:%M:%S%.3f")),
        Err(e) => println!("[{}] cancel refused: {e}", at.format("%H:%M:%S%.3f")),
    }
}

fn print_alert(verb: &str, alert: &Alert) {
    let suppression = alert
        .suppression
        .map(|r| format!(", suppressed: {r:?}"))
        .unwrap_or_default();
    println!(
        "[{}] alert {verb}: {} {} severity {} (score {:.2}, state {:?}{suppression})",
        alert.created_at.format("%H:%M:%S%.3f"),
        alert.id,
        alert.kind,
        alert.severity,
        alert.risk_score,
        alert.state,
    );
}

fn cmd_record(
    config: &Config,
    scenario: Scenario,
    output: &Path,
    rate: Option<f64>,
) -> anyhow::Result<()> {
    let rate = rate.unwrap_or(config.sampling.sample_rate_hz);
    if !(rate.is_finite() && rate > 0.0) {
        bail!("sample rate must be positive, got {rate}");
    }
    let samples = scenario.builder().build(rate, Utc::now());
    save_samples(output, &samples)
        .with_context(|| format!("writing recording {}", output.display()))?;
    println!("Wrote {} samples to {}", samples.len(), output.display());
    Ok(())
}

fn cmd_monitor(
    config: Config,
    scenario: Scenario,
    subject: SubjectId,
    duration: Option<u64>,
    archive: Option<PathBuf>,
) -> anyhow::Result<()> {
    println!("Fall Guard v{VERSION}");
    println!();

    let audit = session_audit(&config);
    let rate_hz = config.sampling.sample_rate_hz;
    let mut runtime = Runtime::new(config, alert_sink(archive)?)
        .context("invalid configuration")?
        .with_risk_sink(Arc::new(TracingSink))
        .with_audit(Arc::clone(&audit));
    runtime.start(subject.clone())?;

    let mut source = SimulatedSource::new(SourceConfig {
        rate_hz,
        realtime: true,
    });
    source
        .start(scenario.builder())
        .context("starting simulated source")?;

    let running = Arc::new(AtomicBool::new(true));
    ctrlc_handler(Arc::clone(&running))?;

    println!("Monitoring {subject} ({scenario:?})");
    println!("Press Ctrl+C to stop");
    println!();

    let started = Instant::now();
    let mut last_tick = Instant::now();
    let receiver = source.receiver().clone();

    while running.load(Ordering::SeqCst) {
        if duration.is_some_and(|secs| started.elapsed() >= Duration::from_secs(secs)) {
            break;
        }

        match receiver.recv_timeout(Duration::from_millis(100)) {
            Ok(sample) => runtime.dispatch(&subject, sample)?,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                warn!("source disconnected unexpectedly");
                break;
            }
        }

        if last_tick.elapsed() >= Duration::from_secs(1) {
            runtime.tick_all(Utc::now());
            for snapshot in runtime.snapshots() {
                let risk = snapshot
                    .risk
                    .as_ref()
                    .map(|r| format!("{} ({:.2})", r.level, r.score))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "[{}] {}: {} | risk {risk}{}",
                    snapshot.computed_at.format("%H:%M:%S"),
                    snapshot.subject_id,
                    snapshot.state,
                    if snapshot.pending_alert.is_some() {
                        " | alert pending"
                    } else {
                        ""
                    }
                );
            }
            last_tick = Instant::now();
        }
    }

    println!();
    println!("Stopping...");
    source.stop();
    runtime.tick_all(Utc::now());
    let pipelines = runtime.shutdown();
    info!(subjects = pipelines.len(), "runtime stopped");

    if let Err(e) = audit.save() {
        warn!("could not save audit log: {e}");
    }
    println!();
    println!("{}", audit.summary());
    Ok(())
}

fn cmd_status(config: &Config) -> anyhow::Result<()> {
    println!("Fall Guard Status");
    println!("=================");
    println!();
    println!("Configuration:");
    println!("  Sample rate: {} Hz", config.sampling.sample_rate_hz);
    println!("  Window: {} samples", config.sampling.window_len());
    println!(
        "  Cancellation window: {}s",
        config.defaults.policy.cancellation_window.as_secs_f64()
    );
    println!("  Subject overrides: {}", config.subjects.len());
    println!();

    let stats_path = config.data_path.join("audit.json");
    if stats_path.exists() {
        let audit = create_shared_log_with_persistence(stats_path);
        println!("Cumulative {}", audit.summary());
    } else {
        println!("No previous session data found.");
    }
    Ok(())
}

fn cmd_config(config: &Config) -> anyhow::Result<()> {
    println!("Configuration");
    println!("=============");
    println!();
    println!("Config file: {:?}", Config::config_path());
    println!();
    println!(
        "{}",
        serde_json::to_string_pretty(config).context("serializing configuration")?
    );
    Ok(())
}

fn cmd_validate(config: &Config) -> anyhow::Result<()> {
    config.validate().context("configuration is invalid")?;
    println!(
        "Configuration is valid ({} subject overrides).",
        config.subjects.len()
    );
    Ok(())
}

/// Set up Ctrl+C handler.
fn ctrlc_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    ctrlc::set_handler(move || {
        running.store(false, Ordering::SeqCst);
    })
    .context("setting Ctrl+C handler")
}
