mod config;
mod error;
mod framer;
mod local_writer;
mod object_store;
mod parser;
mod routine;
mod serial;
mod supervisor;
mod uploader;
mod window;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use config::Configuration;
use error::DataMustBeSavedError;
use local_writer::LocalWriter;
use object_store::HttpObjectStore;
use routine::Routine;
use serial::{DummySerialPort, RealSerialPort, SerialPort};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use supervisor::{CommandSource, SupervisorConfig};
use uploader::Uploader;
use window::WindowSink;

/// On-turbine sensor data gateway: reads framed serial telemetry, decodes it, and persists
/// fixed-duration windows locally and/or to a remote object store.
#[derive(Debug, ClapParser)]
#[command(name = "sensor-gateway", version, about)]
struct GatewayArgs {
    /// Serial port device name (e.g. /dev/ttyUSB0), ignored if --use-dummy-serial-port is set.
    #[arg(long, env = "GATEWAY_SERIAL_PORT")]
    serial_port: Option<String>,

    /// Path to the gateway/node configuration JSON file.
    #[arg(long, env = "GATEWAY_CONFIG_FILE")]
    configuration_path: Option<PathBuf>,

    /// Path to a routine JSON file fired while the gateway reads.
    #[arg(long, env = "GATEWAY_ROUTINE_FILE")]
    routine_path: Option<PathBuf>,

    /// Path to a routine JSON file run once after the stop signal fires, before shutdown.
    #[arg(long)]
    stop_routine_path: Option<PathBuf>,

    /// Persist windows to the local filesystem.
    #[arg(long)]
    save_locally: bool,

    /// Upload windows to the configured remote object store.
    #[arg(long)]
    upload_to_cloud: bool,

    /// Read commands from standard input instead of running a routine file.
    #[arg(long)]
    interactive: bool,

    /// Root directory for local windows and backups (also used as the base local output root
    /// for the cloud uploader's backup files).
    #[arg(long, env = "GATEWAY_OUTPUT_DIR", default_value = "data_gateway")]
    output_directory: PathBuf,

    /// Window duration in seconds.
    #[arg(long, default_value_t = 600.0)]
    window_size: f64,

    /// Base URL (or bucket name) of the remote object store.
    #[arg(long)]
    bucket_name: Option<String>,

    /// Free-text label recorded in the measurement campaign metadata.
    #[arg(long)]
    label: Option<String>,

    /// Also write per-sensor CSV files next to the window JSON files.
    #[arg(long)]
    save_csv_files: bool,

    /// Use an in-memory dummy serial port instead of a real one (for local testing).
    #[arg(long)]
    use_dummy_serial_port: bool,

    /// Default `tracing` filter used when `RUST_LOG` is unset.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Run the stop routine (if any) to put sensors to sleep on exit.
    #[arg(long)]
    stop_sensors_on_exit: bool,
}

fn init_tracing(default_level: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = GatewayArgs::parse();
    init_tracing(&args.log_level);

    if !args.save_locally && !args.upload_to_cloud {
        return Err(DataMustBeSavedError.into());
    }

    let mut configuration = match &args.configuration_path {
        Some(path) => Configuration::from_path(path).context("failed to load configuration")?,
        None => Configuration::default(),
    };
    if args.label.is_some() {
        configuration.measurement_campaign.label = args.label.clone();
    }
    configuration.validate().context("configuration failed validation")?;

    let session = uuid::Uuid::new_v4().to_string();
    let session_start_wall_clock = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64();

    std::fs::create_dir_all(&args.output_directory)
        .with_context(|| format!("failed to create output directory {:?}", args.output_directory))?;

    let mut sinks: Vec<Box<dyn WindowSink>> = Vec::new();
    if args.save_locally {
        let writer = LocalWriter::new(
            &args.output_directory,
            &session,
            args.save_csv_files,
            None,
            configuration.clone(),
        )
        .context("failed to initialise local writer")?;
        sinks.push(Box::new(writer));
    }
    if args.upload_to_cloud {
        let bucket_name = args
            .bucket_name
            .clone()
            .context("--bucket-name is required when --upload-to-cloud is set")?;
        let store = HttpObjectStore::new(bucket_name, Duration::from_secs(30))
            .context("failed to initialise remote object store client")?;
        let uploader = Uploader::new(
            Box::new(store),
            "data-gateway",
            &session,
            &args.output_directory,
            configuration.clone(),
        )
        .context("failed to initialise uploader")?;
        sinks.push(Box::new(uploader));
    }

    let port: Arc<Mutex<dyn SerialPort>> = if args.use_dummy_serial_port {
        Arc::new(Mutex::new(DummySerialPort::new()))
    } else {
        let port_name = args
            .serial_port
            .clone()
            .context("--serial-port is required unless --use-dummy-serial-port is set")?;
        let mut real = RealSerialPort::open(
            &port_name,
            configuration.gateway.baudrate,
            Duration::from_millis(100),
        )
        .context("failed to open serial port")?;
        real.set_buffer_sizes(
            configuration.gateway.serial_buffer_rx_size,
            configuration.gateway.serial_buffer_tx_size,
        )?;
        Arc::new(Mutex::new(real))
    };

    let command_source = if args.interactive {
        CommandSource::Interactive {
            commands_log_path: args.output_directory.join(&session).join("commands.txt"),
        }
    } else if let Some(path) = &args.routine_path {
        CommandSource::Routine(Routine::from_path(path).context("failed to load routine")?)
    } else {
        CommandSource::None
    };

    let stop_routine = if args.stop_sensors_on_exit {
        match &args.stop_routine_path {
            Some(path) => Some(Routine::from_path(path).context("failed to load stop routine")?),
            None => None,
        }
    } else {
        None
    };

    let leading_bytes = configuration.leading_bytes_map();
    let rx_buffer_capacity = configuration.gateway.serial_buffer_rx_size;

    let supervisor_config = SupervisorConfig {
        port,
        configuration,
        leading_bytes,
        rx_buffer_capacity,
        dequeue_timeout: Duration::from_secs(5),
        stop_when_no_more_data_after: None,
        sinks,
        window_size: Duration::from_secs_f64(args.window_size),
        session_start_wall_clock,
        command_source,
        stop_routine,
        stop_poll_interval: Duration::from_secs(1),
    };

    let stop_flag = Arc::new(AtomicBool::new(false));
    let signal_stop_flag = Arc::clone(&stop_flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("received interrupt signal; stopping");
            signal_stop_flag.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    });

    tokio::task::spawn_blocking(move || supervisor::run(supervisor_config, stop_flag))
        .await
        .context("supervisor task panicked")??;

    Ok(())
}
