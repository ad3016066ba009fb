use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use omt_bridge::bridge::{SlotState, Supervisor};
use omt_bridge::config::{BridgeConfig, ConfigStore};
use omt_bridge::decoder::DefaultCodecs;
use omt_bridge::events::BridgeEvent;
use omt_bridge::output::LibOmtBackend;
use omt_bridge::utils::local_ipv4_addresses;

/// Status line interval
const STATUS_INTERVAL: Duration = Duration::from_secs(30);

/// Log level for the application
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Verbose,
    Debug,
    Trace,
}

/// OMT camera bridge command line arguments
#[derive(Parser, Debug)]
#[command(name = "omt-bridge")]
#[command(version, about = "Bridge phone cameras onto the OMT network", long_about = None)]
struct CliArgs {
    /// Configuration file (created with defaults if missing)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address (overrides config)
    #[arg(short = 'a', long, value_name = "ADDRESS")]
    address: Option<String>,

    /// Camera port (overrides config)
    #[arg(short = 'p', long, value_name = "PORT")]
    port: Option<u16>,

    /// Path to libomt (overrides config)
    #[arg(long, value_name = "FILE")]
    omt_lib: Option<PathBuf>,

    /// Write the overrides above back to the configuration file
    #[arg(long, requires = "config")]
    save_config: bool,

    /// Events to log: `*`, a prefix such as `slot.*`, or one event name
    #[arg(long, value_name = "TOPIC", default_value = "*")]
    log_events: String,

    /// Log level (error, warn, info, verbose, debug, trace)
    #[arg(short = 'l', long, value_name = "LEVEL", default_value = "info")]
    log_level: LogLevel,

    /// Increase verbosity (-v for verbose, -vv for debug, -vvv for trace)
    #[arg(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_logging(args.log_level, args.verbose);

    tracing::info!("Starting omt-bridge v{}", env!("CARGO_PKG_VERSION"));

    let store = match &args.config {
        Some(path) => {
            tracing::info!("Configuration file: {}", path.display());
            ConfigStore::open(path).await?
        }
        None => ConfigStore::in_memory(Default::default()),
    };
    let config = if args.save_config {
        store.update(|config| apply_overrides(config, &args)).await?;
        if let Some(path) = store.path() {
            tracing::info!("Saved command line overrides to {}", path.display());
        }
        (*store.get()).clone()
    } else {
        // CLI overrides apply to this run only
        let mut config = (*store.get()).clone();
        apply_overrides(&mut config, &args);
        config
    };
    config.validate()?;

    let port = config.listener.port;
    let sender = Arc::new(LibOmtBackend::new(&config.sender.library_path));
    let supervisor = Supervisor::new(config, Arc::new(DefaultCodecs), sender)?;
    let mut events = supervisor.subscribe();

    let address = supervisor.start_listening(port).await?;
    match local_ipv4_addresses() {
        Ok(addresses) if !addresses.is_empty() => {
            for (interface, ip) in addresses {
                tracing::info!("Cameras can connect to {}:{} ({})", ip, address.port(), interface);
            }
        }
        Ok(_) => tracing::warn!("No non-loopback IPv4 address found"),
        Err(e) => tracing::warn!("Failed to list local addresses: {}", e),
    }

    let mut status_tick = tokio::time::interval(STATUS_INTERVAL);
    status_tick.tick().await;

    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for CTRL+C: {}", e);
                }
                tracing::info!("Shutdown signal received");
                break;
            }
            event = events.recv() => match event {
                Ok(event) if event.matches_topic(&args.log_events) => log_event(&event),
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::debug!("Event log lagged, {} events missed", missed);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = status_tick.tick() => log_status(&supervisor),
        }
    }

    supervisor.shutdown().await;
    tracing::info!("Bridge shutdown complete");
    Ok(())
}

fn log_event(event: &BridgeEvent) {
    match event {
        BridgeEvent::FallbackModeChanged { active: true, reason } => tracing::warn!(
            "Fallback mode: cameras decode locally only ({})",
            reason.as_deref().unwrap_or("sender unavailable")
        ),
        BridgeEvent::FallbackModeChanged { active: false, .. } => {
            tracing::info!("Fallback mode cleared, OMT output restored")
        }
        other => match other.slot() {
            Some(slot) => tracing::info!(event = other.event_name(), slot, "{:?}", other),
            None => tracing::info!(event = other.event_name(), "{:?}", other),
        },
    }
}

fn apply_overrides(config: &mut BridgeConfig, args: &CliArgs) {
    if let Some(address) = &args.address {
        config.listener.bind_address = address.clone();
    }
    if let Some(port) = args.port {
        config.listener.port = port;
    }
    if let Some(path) = &args.omt_lib {
        config.sender.library_path = path.to_string_lossy().to_string();
    }
}

fn log_status(supervisor: &Supervisor) {
    let status = supervisor.status();
    for slot in status.slots.iter().filter(|s| s.state != SlotState::Empty) {
        let battery = slot
            .telemetry
            .as_ref()
            .and_then(|t| t.battery_percent)
            .map(|b| format!("{}%", b))
            .unwrap_or_else(|| "-".to_string());
        let counters = &slot.counters;
        tracing::info!(
            slot = slot.index,
            "{} [{}] {}: V {} / A {} decoded (A/V {}), {:.1} MB in, {} sent, latency {:.1} ms, battery {}",
            slot.name,
            slot.state,
            slot.device.as_ref().map(|d| d.model.as_str()).unwrap_or("?"),
            counters.video_decoded,
            counters.audio_decoded,
            counters
                .audio_video_ratio()
                .map(|r| format!("{:.2}", r))
                .unwrap_or_else(|| "-".to_string()),
            counters.megabytes_received(),
            counters.frames_sent,
            counters.latency_avg_us as f64 / 1000.0,
            battery
        );
    }
}

fn init_logging(level: LogLevel, verbose_count: u8) {
    // Verbose count overrides log level
    let effective_level = match verbose_count {
        0 => level,
        1 => LogLevel::Verbose,
        2 => LogLevel::Debug,
        _ => LogLevel::Trace,
    };

    let filter = match effective_level {
        LogLevel::Error => "omt_bridge=error",
        LogLevel::Warn => "omt_bridge=warn",
        LogLevel::Info => "omt_bridge=info",
        LogLevel::Verbose => "omt_bridge=debug,symphonia=warn",
        LogLevel::Debug => "omt_bridge=debug,symphonia=info",
        LogLevel::Trace => "omt_bridge=trace,symphonia=debug",
    };

    // Environment variable takes highest priority
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into());

    if let Err(err) = tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()
    {
        eprintln!("failed to initialize tracing: {}", err);
    }
}
