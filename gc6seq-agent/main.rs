use anyhow::Context;
use axum::{response::IntoResponse, routing::get, Router};
use clap::{Parser, Subcommand};
use prometheus::{Encoder, TextEncoder};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use gc6seq::common::bus::I2cDevBus;
use gc6seq::common::pci::{PciAddress, SYSFS_PCI_ROOT};
use gc6seq::{
    ConfigSpaceSnapshot, CycleConfig, CycleMetricExporter, CycleRunner, EcProtocol,
    LinkPowerController, PowerSequencer, PowerState, SequencerConfig, SysfsTopology, TargetState,
    WakeupEventKind,
};

type LinuxSequencer = PowerSequencer<I2cDevBus, SysfsTopology, ConfigSpaceSnapshot>;

#[derive(Parser, Debug)]
#[command(name = "gc6seq")]
#[command(about = "Sequence a discrete GPU through GC6 and RTD3 power states")]
struct Args {
    #[arg(short, long, help = "JSON configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "I2C adapter number the EC is attached to (/dev/i2c-N)")]
    bus: Option<u32>,

    #[arg(long, value_parser = parse_ec_address, help = "EC SMBus address (default 0x2A)")]
    ec_address: Option<u8>,

    #[arg(long, value_parser = parse_pci_address, help = "GPU PCI address, e.g. 0000:01:00.0")]
    gpu: Option<PciAddress>,

    #[arg(long, help = "Wakeup event used on exit (gpu-event, timer, hotplug, rtd3-cpu, ...)")]
    wakeup: Option<WakeupEventKind>,

    #[arg(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Increase logging (-v shows every EC transaction, -vv also traces polls)"
    )]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the EC firmware identity
    Info,
    /// Print the EC power and wake status
    Status,
    /// Put the GPU into a low-power state
    Enter { target: TargetState },
    /// Return the GPU to full power
    Exit,
    /// Repeatedly enter and exit a low-power state
    Cycle {
        target: TargetState,

        #[arg(long, default_value_t = 1, help = "Number of cycles, 0 for unlimited")]
        count: u64,

        #[arg(long, default_value_t = 100, help = "Time spent in the low-power state (ms)")]
        dwell_ms: u64,

        #[arg(long, default_value_t = 100, help = "Time spent at full power between cycles (ms)")]
        interval_ms: u64,

        #[arg(long, help = "Keep cycling after a failed cycle")]
        keep_going: bool,

        #[arg(long, help = "Serve Prometheus metrics on this port while cycling")]
        metrics_port: Option<u16>,
    },
}

#[derive(Serialize)]
struct StatusReport {
    state: PowerState,
    fsm_status: String,
    sequencer_busy: bool,
    master_busy: bool,
    wake_cause: String,
    wake_toggled: bool,
    error_code: String,
}

fn parse_ec_address(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed
        .ok()
        .filter(|addr| *addr < 0x80)
        .ok_or_else(|| format!("'{s}' is not a 7-bit SMBus address"))
}

fn parse_pci_address(s: &str) -> Result<PciAddress, String> {
    s.parse().map_err(|e: gc6seq::Gc6Error| e.to_string())
}

async fn metrics_handler(
    axum::extract::State(exporter): axum::extract::State<Arc<CycleMetricExporter>>,
) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&exporter.registry().gather(), &mut buffer) {
        tracing::error!("Failed to encode cycle metrics: {}", e);
    }

    let content_type = encoder.format_type().to_string();
    (
        [("Content-Type", content_type)],
        String::from_utf8(buffer).unwrap_or_default(),
    )
}

fn check_permissions(bus: u32) {
    if nix::unistd::geteuid().is_root() {
        return;
    }

    let dev = format!("/dev/i2c-{bus}");
    if let Err(e) = std::fs::OpenOptions::new().read(true).write(true).open(&dev) {
        if e.kind() == std::io::ErrorKind::PermissionDenied {
            eprintln!("\n⚠️  ERROR: Permission denied accessing {dev}\n\nRun as root, or add your user to the i2c group.\n");
            std::process::exit(1);
        }
    }
    tracing::warn!("Not running as root; PCI config writes to the upstream port may fail");
}

fn load_config(args: &Args) -> anyhow::Result<SequencerConfig> {
    let mut config = match &args.config {
        Some(path) => SequencerConfig::load(path)?,
        None => SequencerConfig::default(),
    };

    if let Some(bus) = args.bus {
        config.device.i2c_bus = bus;
    }
    if let Some(address) = args.ec_address {
        config.device.ec_address = address;
    }
    if let Some(gpu) = args.gpu {
        config.device.gpu = Some(gpu);
    }
    if let Some(wakeup) = args.wakeup {
        config.options.wakeup = wakeup;
    }
    config.options.verbosity = config.options.verbosity.max(args.verbose);
    config.options.validate()?;

    Ok(config)
}

fn build_sequencer(config: &SequencerConfig) -> anyhow::Result<LinuxSequencer> {
    let root = SYSFS_PCI_ROOT.as_path();
    let gpu = config.device.resolve_gpu(root)?;
    let companions = if config.options.preserve_companions {
        config.device.resolve_companions(root, gpu)?
    } else {
        Vec::new()
    };

    tracing::info!(
        "GPU {} with EC at 0x{:02x} on /dev/i2c-{} ({} companion function(s))",
        gpu,
        config.device.ec_address,
        config.device.i2c_bus,
        companions.len()
    );

    let bus = I2cDevBus::open(config.device.i2c_bus)
        .with_context(|| format!("opening /dev/i2c-{}", config.device.i2c_bus))?;
    let sequencer = PowerSequencer::new(
        EcProtocol::new(bus, config.device.ec_address),
        LinkPowerController::new(SysfsTopology::with_root(root.to_path_buf()), gpu),
        ConfigSpaceSnapshot::new(root, companions),
        config.options.clone(),
    )?;
    Ok(sequencer)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal(cancel_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Ctrl+C received!");
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                tracing::info!("SIGTERM received!");
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
        _ = cancel_token.cancelled() => return,
    }

    tracing::warn!("Shutdown requested; stopping after the current cycle");
    cancel_token.cancel();
}

async fn run_cycle(
    sequencer: LinuxSequencer,
    config: CycleConfig,
    metrics_port: Option<u16>,
) -> anyhow::Result<()> {
    let exporter = Arc::new(CycleMetricExporter::new(config.target.name())?);
    let runner = Arc::new(CycleRunner::new(sequencer, config).with_exporter(Arc::clone(&exporter)));
    let cancel_token = CancellationToken::new();

    let cycle_handle = Arc::clone(&runner).spawn(cancel_token.clone());

    let server = match metrics_port {
        Some(port) => {
            let app = Router::new()
                .route("/metrics", get(metrics_handler))
                .with_state(exporter);
            let addr = SocketAddr::from(([0, 0, 0, 0], port));
            tracing::warn!("Starting HTTP server on {}", addr);
            let listener = tokio::net::TcpListener::bind(addr).await?;
            let shutdown = cancel_token.clone();
            Some(tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
            }))
        }
        None => None,
    };

    let signals = tokio::spawn(shutdown_signal(cancel_token.clone()));
    let summary = cycle_handle.await?;
    cancel_token.cancel();
    let _ = signals.await;

    if let Some(server) = server {
        server.await??;
    }

    tracing::info!(
        "Cycling finished: {} completed, {} failed",
        summary.completed,
        summary.failed
    );
    print_json(&summary.last)?;

    if summary.failed > 0 {
        anyhow::bail!("{} cycle(s) failed", summary.failed);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = load_config(&args)?;
    check_permissions(config.device.i2c_bus);

    let mut sequencer = build_sequencer(&config)?;

    match args.command {
        Command::Info => {
            let info = sequencer.identify()?;
            println!("Vendor:       0x{:04x}", info.vendor_id);
            println!("Device:       0x{:04x}", info.device_id);
            println!("Firmware:     {}.{} ({})", info.version.0, info.version.1, info.date);
            println!("Project:      {}", info.project);
            println!("Capabilities: {:?}", info.capabilities);
        }
        Command::Status => {
            let state = sequencer.resync_state()?;
            let ec = sequencer.ec();
            let status = ec.read_fsm_status()?;
            let wake = ec.read_wake_status()?;
            let error = ec.read_error_code()?;
            print_json(&StatusReport {
                state,
                fsm_status: format!("{:?}", status.power_status()?),
                sequencer_busy: status.sequencer_busy,
                master_busy: status.master_busy,
                wake_cause: format!("{:?}", wake.cause()),
                wake_toggled: wake.toggled,
                error_code: format!("{:?}", error),
            })?;
        }
        Command::Enter { target } => {
            let result = sequencer.enter(target);
            print_json(sequencer.stats())?;
            result?;
        }
        Command::Exit => {
            sequencer.identify()?;
            let state = sequencer.resync_state()?;
            tracing::info!("EC reports {}", state);
            let result = sequencer.exit();
            print_json(sequencer.stats())?;
            result?;
        }
        Command::Cycle {
            target,
            count,
            dwell_ms,
            interval_ms,
            keep_going,
            metrics_port,
        } => {
            let cycle = CycleConfig {
                target,
                cycles: count,
                dwell: Duration::from_millis(dwell_ms),
                interval: Duration::from_millis(interval_ms),
                stop_on_failure: !keep_going,
            };
            run_cycle(sequencer, cycle, metrics_port).await?;
        }
    }

    Ok(())
}
