//! MIDI Router
//!
//! Connects MIDI inputs, decodes their traffic and routes it to a synth
//! output and an activity log.

use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use std::path::Path;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use midi_router::action::ActionKind;
use midi_router::config::{AppConfig, ConfigWatcher};
use midi_router::connection::ConnectionPolicy;
use midi_router::midi::OMNI;
use midi_router::monitor::run_monitor;
use midi_router::paths::AppPaths;
use midi_router::settings::{Settings, SledSettings};
use midi_router::synth::{LogKeyboard, LogSynth, MidiOutputSynth, Synth};
use midi_router::transport::{discover_input_ports, discover_output_ports, InputManager};
use midi_router::Router;

/// Route MIDI input to a synth with per-device and per-controller policy
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// List available MIDI ports
    #[arg(long)]
    list_ports: bool,

    /// Print decoded traffic instead of routing it
    #[arg(long)]
    monitor: bool,

    /// Input port substring for --monitor (default: all inputs)
    #[arg(long)]
    port: Option<String>,

    /// Channel filter override, 0-15 or -1 for omni
    #[arg(long, allow_hyphen_values = true)]
    channel: Option<i8>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let paths = AppPaths::detect();
    paths
        .ensure_directories()
        .context("Failed to create application directories")?;

    let _log_guards = init_logging(&args.log_level, &paths.logs_dir)?;

    info!("Starting midi-router v{}", env!("CARGO_PKG_VERSION"));

    let config_path = args
        .config
        .clone()
        .unwrap_or_else(|| paths.config.to_string_lossy().to_string());
    if !Path::new(&config_path).exists() {
        info!("No config at {}, writing defaults", config_path);
        AppConfig::default().save(&config_path).await?;
    }

    let (config_watcher, initial_config) = ConfigWatcher::new(config_path.clone()).await?;
    let config = (*initial_config).clone();
    info!("Configuration loaded from {} (hot-reload enabled)", config_path);

    if let Some(channel) = args.channel {
        if !(-1..=15).contains(&channel) {
            anyhow::bail!("--channel must be -1 (omni) or 0-15, got {}", channel);
        }
    }

    if args.monitor {
        let channel = args.channel.unwrap_or(OMNI);
        return run_monitor(&config.midi.client_name, args.port.as_deref(), channel).await;
    }

    let settings = open_settings(&paths);

    if args.list_ports {
        settings.set_auto_connect_default(config.midi.auto_connect_new_devices);
        return print_ports(&config.midi.client_name, &ConnectionPolicy::new(settings));
    }

    let synth = open_synth(&config);
    let keyboard = Arc::new(LogKeyboard::new());
    let router = Arc::new(Router::with_activity_window(
        synth,
        keyboard,
        settings.clone(),
        config.activity_window(),
    ));
    apply_config(&router, &settings, &config, args.channel);

    run_app(router, settings, config, config_watcher, args.channel).await?;

    info!("midi-router shutdown complete");
    Ok(())
}

async fn run_app(
    router: Arc<Router>,
    settings: Settings,
    config: AppConfig,
    mut config_watcher: ConfigWatcher,
    channel_override: Option<i8>,
) -> Result<()> {
    let _subscriptions = [
        router.monitor_controller_activity(|event| {
            debug!(
                "Device {} ch:{} CC {} = {}",
                event.device,
                event.channel + 1,
                event.controller,
                event.value
            );
        }),
        router.monitor_action_activity(|event| match event.kind {
            ActionKind::Absolute => info!("{}: {:.0}%", event.action, event.fraction() * 100.0),
            ActionKind::Relative => info!("{}: step {:+}", event.action, event.relative_delta()),
            ActionKind::OnOff => info!(
                "{}: {}",
                event.action,
                if event.is_on() { "on" } else { "off" }
            ),
        }),
        router.monitor_channel_activity(|event| {
            debug!("Device {} active on channel {}", event.device, event.channel + 1);
        }),
    ];

    let mut inputs = InputManager::new(&config.midi.client_name, router.clone());
    let mut scan = tokio::time::interval(config.scan_interval());
    scan.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    info!("Routing MIDI (rescan every {:?})", config.scan_interval());

    loop {
        tokio::select! {
            _ = scan.tick() => {
                match inputs.refresh() {
                    Ok(changes) => {
                        for port in &changes.appeared {
                            info!("Device appeared: {} ({})", port.name, port.device);
                        }
                        for device in &changes.disappeared {
                            info!("Device gone: {}", device);
                        }
                    }
                    Err(e) => warn!("MIDI rescan failed: {}", e),
                }
            }
            Some(update) = config_watcher.next_update() => {
                if update.changes.routing {
                    apply_config(&router, &settings, &update.config, channel_override);
                }
                if update.changes.scan_interval {
                    scan = tokio::time::interval(update.config.scan_interval());
                    scan.set_missed_tick_behavior(MissedTickBehavior::Skip);
                }
                if update.changes.restart_required {
                    warn!("Output port and client name changes apply after restart");
                }
            }
            _ = &mut shutdown => break,
        }
    }

    router.release_all_keys();
    let connected = inputs.connected();
    if !connected.is_empty() {
        let names: Vec<_> = connected.iter().map(|(_, name)| name.as_str()).collect();
        info!("Closing {} input(s): {}", names.len(), names.join(", "));
    }
    inputs.disconnect_all();

    let touched: Vec<_> = router
        .controller_snapshots()
        .into_iter()
        .filter(|c| c.last_value.is_some())
        .collect();
    if !touched.is_empty() {
        debug!(
            "Controller state at exit: {}",
            serde_json::to_string(&touched).unwrap_or_default()
        );
    }

    Ok(())
}

/// Push config values into the running router
fn apply_config(router: &Router, settings: &Settings, config: &AppConfig, channel_override: Option<i8>) {
    router.set_channel_filter(channel_override.unwrap_or(config.midi.channel));
    settings.set_auto_connect_default(config.midi.auto_connect_new_devices);
    router.set_action_bindings(config.action_bindings());
    router.set_activity_window(config.activity_window());
}

fn open_settings(paths: &AppPaths) -> Settings {
    let db_path = paths.settings_db_path();
    match SledSettings::open(&db_path) {
        Ok(store) => Settings::new(Arc::new(store)),
        Err(e) => {
            warn!(
                "Failed to open settings at {} ({}), changes will not persist",
                db_path.display(),
                e
            );
            Settings::in_memory()
        }
    }
}

fn open_synth(config: &AppConfig) -> Arc<dyn Synth> {
    let Some(port) = config.midi.output_port.as_deref() else {
        info!("No output port configured, logging synth commands");
        return Arc::new(LogSynth);
    };

    match MidiOutputSynth::open(&config.midi.client_name, port, config.midi.output_channel) {
        Ok(synth) => {
            info!("Routing to '{}'", synth.port_name());
            Arc::new(synth)
        }
        Err(e) => {
            warn!("Failed to open output '{}': {}. Logging synth commands instead", port, e);
            Arc::new(LogSynth)
        }
    }
}

fn print_ports(client_name: &str, policy: &ConnectionPolicy) -> Result<()> {
    let inputs = discover_input_ports(client_name)?;
    let outputs = discover_output_ports(client_name)?;

    println!("\n{}", "=== MIDI Input Ports ===".bold().cyan());
    if inputs.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for port in &inputs {
        let connect = if policy.should_auto_connect(port.device) {
            "auto-connect".green()
        } else {
            "manual".yellow()
        };
        println!(
            "  [{}] {} {} {}{}",
            port.index,
            port.name.white(),
            format!("#{}", port.device).dimmed(),
            connect,
            if port.is_virtual { " (virtual)" } else { "" }
        );
    }

    println!("\n{}", "=== MIDI Output Ports ===".bold().cyan());
    if outputs.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for port in &outputs {
        println!("  [{}] {}", port.index, port.name.white());
    }
    println!();

    Ok(())
}

/// Both writers are non-blocking so MIDI callback threads never wait on I/O.
/// The returned guards flush on drop.
fn init_logging(level: &str, logs_dir: &Path) -> Result<[WorkerGuard; 2]> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (stdout_writer, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());

    let file_appender = tracing_appender::rolling::daily(logs_dir, "midi-router.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(stdout_writer)
                .with_target(false)
                .with_thread_ids(false)
                .with_thread_names(false),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    Ok([stdout_guard, guard])
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
