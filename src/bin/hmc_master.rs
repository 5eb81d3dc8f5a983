//! `hmc_master`: upper-level process-control client (spec.md §4.6).
//!
//! Mirrors `examples/original_source/hmc_master.py`'s `main()`: parse CLI
//! flags selecting one procedure, connect to the Command Service, open the
//! actuator's serial link, load calibration, and run the state machine.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use gas_daq::config::Settings;
use gas_daq::process_controller::calibration::Calibration;
use gas_daq::process_controller::client::CommandClient;
use gas_daq::process_controller::{ProcessController, Procedure};
use gas_daq::serial_transport::SerialTransport;

/// Process-control client sequencing lab procedures for the gas analyzer.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    host: Option<String>,
    #[arg(long)]
    cmd_port: Option<u16>,
    #[arg(long)]
    data_port: Option<u16>,
    #[arg(long)]
    actuator_port: Option<String>,
    #[arg(long)]
    actuator_baud: Option<u32>,
    #[arg(long)]
    h2_drift: Option<f64>,
    #[arg(long)]
    ch4_drift: Option<f64>,
    #[arg(long, default_value = "calibration.txt")]
    calib_file: PathBuf,

    #[arg(long)]
    wash: Option<u32>,
    #[arg(long)]
    fill: Option<i64>,
    #[arg(long)]
    empty: bool,
    #[arg(long)]
    home: bool,
    #[arg(long)]
    breath_open: bool,
    #[arg(long)]
    boot: bool,

    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    #[arg(short, long)]
    quiet: bool,
    #[arg(short = 'S', long)]
    silent: bool,
}

impl Cli {
    fn procedure(&self) -> Procedure {
        if let Some(cycles) = self.wash {
            Procedure::Wash(cycles)
        } else if let Some(target) = self.fill {
            Procedure::Fill(target)
        } else if self.empty {
            Procedure::Empty
        } else if self.home {
            Procedure::Home
        } else if self.breath_open {
            Procedure::BreathOpen
        } else if self.boot {
            Procedure::Boot
        } else {
            Procedure::Exam
        }
    }
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
    if let Some(v) = &cli.actuator_port {
        settings.actuator_port = v.clone();
    }
    if let Some(v) = cli.actuator_baud {
        settings.actuator_baud = v;
    }
    if let Some(v) = cli.h2_drift {
        settings.h2_base_drift_mv_per_min = v;
    }
    if let Some(v) = cli.ch4_drift {
        settings.ch4_base_drift_mv_per_min = v;
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

    let procedure = cli.procedure();
    match run(settings, procedure, &cli.calib_file).await {
        Ok(code) => std::process::ExitCode::from(code as u8),
        Err(e) => {
            log::error!("fatal: {e}");
            std::process::ExitCode::FAILURE
        }
    }
}

async fn run(settings: Settings, procedure: Procedure, calib_path: &std::path::Path) -> Result<i32> {
    let cmd = CommandClient::connect(&settings.cmd_addr()).await?;
    let actuator = SerialTransport::open(
        &settings.actuator_port,
        settings.actuator_baud,
        Duration::from_secs(1),
        Duration::from_millis(200),
    )?;
    let calib = Calibration::load(calib_path).unwrap_or_default();

    let mut controller = ProcessController::new(settings, cmd, Box::new(actuator), calib);
    controller.run(procedure).await
}
