//! WDGM daemon entry point.
//!
//! Boots the supervision core on emulated interrupts, runs the demo task
//! in the main loop, and reacts to watchdog expiry the way a device would:
//! by rebooting the whole supervision context, or by exiting.

mod host;
mod signals;
mod task;

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use wdgm_common::config::{BackstopBackend, ExpiryAction, SupervisionConfig};
use wdgm_common::metrics::SupervisionSnapshot;
use wdgm_common::watchdog::ResetCause;
use wdgm_runtime::scheduler::MainLoop;
use wdgm_runtime::simulated::SimulatedWatchdog;
use wdgm_runtime::{SupervisionContext, WatchdogHardware};

use crate::host::{HostContext, HostInterrupts, HostTimers, InterruptEmulator};
use crate::signals::SignalHandler;
use crate::task::{BlinkTask, TaskFault};

/// Pause between main-loop passes.
const PASS_INTERVAL: Duration = Duration::from_micros(250);

/// WDGM daemon command-line arguments.
#[derive(Parser, Debug)]
#[command(
    name = "wdgm-daemon",
    about = "Heartbeat supervision with a hardware watchdog backstop",
    version,
    long_about = None
)]
struct Args {
    /// Path to a supervision configuration file (TOML).
    #[arg(long, short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Watchdog backend (overrides config file).
    #[arg(long, short = 'b', value_enum)]
    backend: Option<Backend>,

    /// Stop after this long, e.g. "30s" (default: run until signalled).
    #[arg(long, short = 'd', value_parser = humantime::parse_duration)]
    duration: Option<Duration>,

    /// Fault to inject into the running system.
    #[arg(long, short = 'i', value_enum)]
    inject: Option<Inject>,

    /// Delay after boot before the fault is injected.
    #[arg(long, default_value = "2s", value_parser = humantime::parse_duration)]
    inject_after: Duration,

    /// Watchdog resets tolerated before giving up (with `on_expiry = "reboot"`).
    #[arg(long, default_value = "3")]
    max_resets: u32,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, short = 'l', default_value = "info")]
    log_level: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// In-process countdown.
    Simulated,
    /// Linux /dev/watchdog.
    DevWatchdog,
}

impl From<Backend> for BackstopBackend {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Simulated => BackstopBackend::Simulated,
            Backend::DevWatchdog => BackstopBackend::DevWatchdog,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Inject {
    /// The task keeps running but stops reporting.
    HangTask,
    /// The task reports several times per run.
    RunawayTask,
    /// An evaluation starts and never finishes.
    StuckEvaluation,
}

/// How one boot of the supervision context ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootEnd {
    /// Signal or `--duration`.
    Shutdown,
    /// SIGHUP: stop cleanly, reload configuration, boot again.
    Reload,
    /// The simulated watchdog expired.
    Expired,
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(&args.log_level);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting WDGM daemon");

    let mut config = load_config(&args)?;
    if let Some(backend) = args.backend {
        config.host.backend = backend.into();
    }
    config.validate().context("Invalid supervision configuration")?;

    info!(
        window = ?config.window.length,
        min_calls = config.window.min_calls,
        max_calls = config.window.max_calls,
        timeout = %config.backstop.timeout,
        backend = ?config.host.backend,
        "Configuration loaded"
    );

    let signal_handler = SignalHandler::new().context("Failed to set up signal handlers")?;

    run_daemon(config, &args, &signal_handler)
}

/// Initialize logging with the specified log level.
fn init_logging(level: &str) {
    let filter = format!("wdgm_daemon={level},wdgm_runtime={level},wdgm_common={level}");

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&filter)),
        )
        .with_target(true)
        .with_thread_ids(true)
        .init();
}

/// Load configuration from file or use defaults.
///
/// Resolution priority (first existing file wins):
/// 1. Command-line `--config` argument
/// 2. `WDGM_CONFIG_PATH` environment variable
/// 3. `/etc/wdgm/config.toml` (system path)
/// 4. `config/default.toml` (local development)
/// 5. Built-in defaults
fn load_config(args: &Args) -> Result<SupervisionConfig> {
    if let Some(config_path) = &args.config {
        info!(?config_path, "Loading config from command-line argument");
        return SupervisionConfig::from_file(config_path)
            .with_context(|| format!("Failed to load config from {config_path:?}"));
    }

    if let Ok(env_path) = std::env::var("WDGM_CONFIG_PATH") {
        let config_path = PathBuf::from(&env_path);
        if config_path.exists() {
            info!(?config_path, "Loading config from WDGM_CONFIG_PATH");
            return SupervisionConfig::from_file(&config_path)
                .with_context(|| format!("Failed to load config from WDGM_CONFIG_PATH={env_path:?}"));
        }
        warn!(
            path = %env_path,
            "WDGM_CONFIG_PATH set but file does not exist, checking other locations"
        );
    }

    let system_path = PathBuf::from("/etc/wdgm/config.toml");
    if system_path.exists() {
        info!(?system_path, "Loading config from system path");
        return SupervisionConfig::from_file(&system_path)
            .with_context(|| format!("Failed to load config from {system_path:?}"));
    }

    let local_path = PathBuf::from("config/default.toml");
    if local_path.exists() {
        info!(?local_path, "Loading config from local path");
        return SupervisionConfig::from_file(&local_path)
            .with_context(|| format!("Failed to load config from {local_path:?}"));
    }

    info!("No config file found, using built-in defaults");
    Ok(SupervisionConfig::default())
}

/// Boot, run and reboot until shutdown or the reset budget runs out.
fn run_daemon(mut config: SupervisionConfig, args: &Args, signals: &SignalHandler) -> Result<()> {
    let started = Instant::now();
    // The simulated watchdog is hardware: it outlives every boot.
    let simulated = Arc::new(SimulatedWatchdog::new());
    let mut resets = 0u32;
    let deadline = args.duration.map(|d| started + d);

    loop {
        match run_boot(&config, args, signals, &simulated, deadline)? {
            BootEnd::Shutdown => break,
            BootEnd::Reload => config = reload_config(args, config),
            BootEnd::Expired => {
                resets += 1;
                match config.host.on_expiry {
                    ExpiryAction::Exit => bail!("Watchdog expired"),
                    ExpiryAction::Reboot if resets > args.max_resets => {
                        bail!("Watchdog expired {resets} times, giving up")
                    }
                    ExpiryAction::Reboot => info!(resets, "Rebooting supervision context"),
                }
            }
        }
    }

    info!(
        resets,
        signals = signals.state().signal_count(),
        uptime_secs = started.elapsed().as_secs(),
        "Daemon shutdown complete"
    );
    Ok(())
}

/// Re-read the configuration after SIGHUP, keeping the old one on error.
fn reload_config(args: &Args, current: SupervisionConfig) -> SupervisionConfig {
    let loaded = load_config(args).and_then(|mut config| {
        if let Some(backend) = args.backend {
            config.host.backend = backend.into();
        }
        config.validate().context("Invalid supervision configuration")?;
        Ok(config)
    });
    match loaded {
        Ok(config) => {
            info!("Configuration reloaded");
            config
        }
        Err(e) => {
            warn!("Reload failed, keeping current configuration: {e:#}");
            current
        }
    }
}

fn open_watchdog(
    config: &SupervisionConfig,
    simulated: &Arc<SimulatedWatchdog>,
) -> Result<(Box<dyn WatchdogHardware>, Option<Arc<SimulatedWatchdog>>)> {
    match config.host.backend {
        BackstopBackend::Simulated => {
            let hardware: Box<dyn WatchdogHardware> = Box::new(Arc::clone(simulated));
            Ok((hardware, Some(Arc::clone(simulated))))
        }
        #[cfg(target_os = "linux")]
        BackstopBackend::DevWatchdog => {
            let device: Box<dyn WatchdogHardware> = Box::new(
                wdgm_runtime::DevWatchdog::open(&config.host.device)
                    .context("Failed to open hardware watchdog")?,
            );
            Ok((device, None))
        }
        #[cfg(not(target_os = "linux"))]
        BackstopBackend::DevWatchdog => {
            bail!("The dev_watchdog backend is only available on Linux")
        }
    }
}

/// Run one boot of the supervision context.
fn run_boot(
    config: &SupervisionConfig,
    args: &Args,
    signals: &SignalHandler,
    simulated: &Arc<SimulatedWatchdog>,
    deadline: Option<Instant>,
) -> Result<BootEnd> {
    let (watchdog, countdown) = open_watchdog(config, simulated)?;

    let irq = Arc::new(HostInterrupts::new());
    let mut timers = HostTimers::default();
    let ctx: Arc<HostContext> = Arc::new(
        SupervisionContext::boot(config.clone(), Arc::clone(&irq), &mut timers, watchdog)
            .context("Failed to boot supervision")?,
    );
    if ctx.reset_cause() == ResetCause::Watchdog {
        warn!("Booted after a watchdog reset");
    }

    let mut emulator = InterruptEmulator::start(&ctx, &irq, &timers, countdown)?;
    let mut main_loop = MainLoop::new(config, ctx.now());
    let mut task = BlinkTask::new();

    let booted = Instant::now();
    let mut injected = false;
    let mut frozen = false;
    let mut last_status = Instant::now();
    let mut refresh_failures = 0;

    let end = loop {
        if signals.shutdown_requested() {
            info!("Shutdown signal received, stopping supervision");
            break BootEnd::Shutdown;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            info!("Run duration reached");
            break BootEnd::Shutdown;
        }
        if emulator.expired() {
            break BootEnd::Expired;
        }
        if signals.take_reload_request() {
            info!("Reload requested, restarting supervision");
            break BootEnd::Reload;
        }

        if let Some(fault) = args.inject {
            if !injected && booted.elapsed() >= args.inject_after {
                injected = true;
                match fault {
                    Inject::HangTask => task.inject(TaskFault::Silent),
                    Inject::RunawayTask => task.inject(TaskFault::Runaway),
                    Inject::StuckEvaluation => {
                        warn!("Entering an evaluation that never completes");
                        drop(ctx.monitor().enter_evaluation());
                        frozen = true;
                    }
                }
            }
        }

        if !frozen {
            main_loop.poll(&*ctx, &mut task);
        }

        if last_status.elapsed() >= config.host.status_interval {
            last_status = Instant::now();
            let snapshot = ctx.snapshot();
            info!(
                now = %snapshot.now,
                status = %snapshot.status,
                stuck = snapshot.stuck,
                windows = snapshot.windows_closed,
                degraded = snapshot.degraded_windows,
                refreshes = snapshot.refreshes,
                withheld = snapshot.withheld(),
                healthy_ratio = ?snapshot.healthy_ratio(),
                led_on = task.led_on(),
                "Periodic status"
            );
            if snapshot.refresh_failures > refresh_failures {
                warn!(
                    failures = snapshot.refresh_failures,
                    new = snapshot.refresh_failures - refresh_failures,
                    "Hardware watchdog rejected refreshes"
                );
                refresh_failures = snapshot.refresh_failures;
            }
        }

        std::thread::sleep(PASS_INTERVAL);
    };

    emulator.stop();
    let snapshot = ctx.snapshot();
    let summary = summarize(&snapshot);

    match end {
        BootEnd::Shutdown | BootEnd::Reload => {
            if let Err(e) = ctx.shutdown() {
                warn!("Failed to disarm watchdog: {e}");
            }
            info!(%summary, task_runs = task.runs(), "Supervision stopped");
        }
        BootEnd::Expired => {
            error!(
                %summary,
                expiry_warnings = snapshot.expiry_warnings,
                "Watchdog expired, system reset"
            );
        }
    }

    Ok(end)
}

/// JSON form of a snapshot for the end-of-boot log line.
fn summarize(snapshot: &SupervisionSnapshot) -> String {
    serde_json::to_string(snapshot).unwrap_or_else(|e| {
        warn!("Failed to serialize supervision summary: {e}");
        format!("{snapshot:?}")
    })
}
