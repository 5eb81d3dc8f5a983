//! `daq_server`: acquisition and multiplexing server (spec.md §§2-5).
//!
//! Mirrors `examples/original_source/daq_server.py`'s `main()`: spawn the
//! DAQ Worker, wait briefly for early fatal errors, then start the Command
//! and Data Service listeners and run the supervisor loop that drains the
//! worker's sample/message/error channels.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use gas_daq::command_service::{self, CommandServiceState};
use gas_daq::config::Settings;
use gas_daq::daq_worker::{self, WorkerEvent};
use gas_daq::data_service::{self, DataServiceState};
use gas_daq::ring::SampleRing;
use gas_daq::sensor::SensorCatalog;
use gas_daq::serial_transport::SerialTransport;
use log::{error, info, warn};
use tokio::sync::RwLock;

/// Data-acquisition and multiplexing server for the lab gas analyzer.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[arg(long, default_value = None)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    cmd_port: Option<u16>,
    #[arg(long)]
    data_port: Option<u16>,
    #[arg(long)]
    nplc: Option<f64>,
    #[arg(long)]
    bufsize: Option<f64>,
    #[arg(long)]
    max_handlers: Option<usize>,
    #[arg(long)]
    daq_port: Option<String>,
    #[arg(long)]
    daq_baud: Option<u32>,
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[arg(short, long)]
    quiet: bool,
    #[arg(short = 'S', long)]
    silent: bool,
}

fn apply_cli(mut settings: Settings, cli: &Cli) -> Settings {
    if let Some(v) = &cli.host {
        settings.host = v.clone();
    }
    if let Some(v) = cli.cmd_port {
        settings.cmd_port = v;
    }
    if let Some(v) = cli.data_port {
        settings.data_port = v;
    }
    if let Some(v) = cli.nplc {
        settings.nplc = v;
    }
    if let Some(v) = cli.bufsize {
        settings.bufsize_secs = v;
    }
    if let Some(v) = cli.max_handlers {
        settings.max_handlers = v;
    }
    if let Some(v) = &cli.daq_port {
        settings.daq_port = v.clone();
    }
    if let Some(v) = cli.daq_baud {
        settings.daq_baud = v;
    }
    settings
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(s) => apply_cli(s, &cli),
        Err(e) => {
            eprintln!("configuration error: {e}");
            return std::process::ExitCode::from(2);
        }
    };

    let level = if cli.silent {
        "off"
    } else if cli.quiet {
        "warn"
    } else {
        match cli.verbose {
            0 => settings.log_level.as_str(),
            1 => "debug",
            _ => "trace",
        }
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(settings).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!("fatal: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings) -> Result<()> {
    let catalog = Arc::new(SensorCatalog::default_catalog());
    let ring = Arc::new(RwLock::new(SampleRing::new(settings.bufsize_secs)));
    let terminate = Arc::new(tokio::sync::Notify::new());

    let transport = SerialTransport::open(
        &settings.daq_port,
        settings.daq_baud,
        Duration::from_secs(1),
        Duration::from_millis(500),
    )?;
    let channels: Vec<String> = catalog.iter().map(|s| s.channel.clone()).collect();

    let (worker_tx, worker_rx) = std::sync::mpsc::channel::<WorkerEvent>();
    let (worker_handle, _worker_join) = daq_worker::spawn(Box::new(transport), channels, worker_tx);

    let (async_tx, mut async_rx) = tokio::sync::mpsc::channel::<WorkerEvent>(1024);
    std::thread::spawn(move || {
        while let Ok(event) = worker_rx.recv() {
            if async_tx.blocking_send(event).is_err() {
                break;
            }
        }
    });

    let cmd_state = Arc::new(CommandServiceState::new(
        ring.clone(),
        catalog.clone(),
        worker_handle.clone(),
        terminate.clone(),
        settings.max_handlers,
    ));
    let data_state = Arc::new(DataServiceState::new(
        ring.clone(),
        catalog.clone(),
        terminate.clone(),
    ));

    let cmd_addr = settings.cmd_addr();
    let data_addr = settings.data_addr();
    let cmd_state_clone = cmd_state.clone();
    let data_state_clone = data_state.clone();
    tokio::spawn(async move {
        if let Err(e) = command_service::serve(&cmd_addr, cmd_state_clone).await {
            error!("command service stopped: {e}");
        }
    });
    tokio::spawn(async move {
        if let Err(e) = data_service::serve(&data_addr, data_state_clone).await {
            error!("data service stopped: {e}");
        }
    });

    info!("daq_server running");

    loop {
        tokio::select! {
            event = async_rx.recv() => {
                match event {
                    Some(WorkerEvent::Sample(record)) => {
                        ring.write().await.append(record.t, record.values.clone());
                        data_state.publish(&record).await;
                    }
                    Some(WorkerEvent::Message(msg)) => {
                        info!("daq worker: {msg}");
                        if msg == "ABORT" || msg == "EXIT" {
                            terminate.notify_waiters();
                            break;
                        }
                    }
                    Some(WorkerEvent::Error { text, fatal }) => {
                        warn!("daq worker error: {text}");
                        if fatal {
                            terminate.notify_waiters();
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = terminate.notified() => break,
        }
    }

    info!("daq_server shutting down");
    Ok(())
}
