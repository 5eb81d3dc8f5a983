//! Process Controller: the upper-level state machine that sequences lab
//! procedures (spec.md §4.6).
//!
//! A plain `enum ProcessState` driving a `match` loop, mirroring
//! `hmc_master.py`'s `main()` `match state.upper(): case '...':` structure
//! directly — see DESIGN.md for why the teacher's generic
//! `procedures::Procedure`/`ProcedureStep` framework is not used here.

pub mod actuator;
pub mod calib_curves;
pub mod calibration;
pub mod client;
pub mod valves;

use std::time::{Duration, Instant};

use anyhow::Result;
use log::info;

use crate::config::Settings;
use crate::process_controller::calib_curves::CalibCurves;
use crate::process_controller::calibration::Calibration;
use crate::process_controller::client::CommandClient;
use crate::process_controller::valves::ValveMask;

/// One named state of the controller's fixed FSM.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessState {
    Init,
    TempStabilizing,
    WaitBaselines,
    CalibB0WaitDrift,
    CalibB0WaitT105,
    ExamStart,
    ExamPushing,
    ExamWaitT107,
    Wash { cycles_remaining: u32 },
    Fill { target: i64 },
    Empty,
    Home,
    BreathOpen,
    Exit,
}

/// What the operator asked the controller to do once baselines are ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Procedure {
    /// Run the still-air baseline calibration once, then continue to wait.
    Boot,
    /// Wait for an operator `ENTER` and run one timed exam.
    Exam,
    Wash(u32),
    Fill(i64),
    Empty,
    Home,
    BreathOpen,
}

pub struct ProcessController {
    settings: Settings,
    cmd: CommandClient,
    actuator_link: Box<dyn crate::serial_transport::LineChannel>,
    calib: Calibration,
    curves: Option<CalibCurves>,
    t0: Instant,
    tgs_comp: f64,
    /// CH4 level at T0 of the still-air baseline calibration, captured in
    /// `step_calib_wait_drift` and consumed in `step_calib_wait_t105`.
    calib_tgs_base: f64,
    /// Pre-push exam baselines captured in `step_exam_start`, subtracted
    /// from the T105/peak readings in `step_exam_wait_t107`.
    exam_tgs_baseline: f64,
    exam_h2_baseline: f64,
    exam_o2_baseline: f64,
}

const TEMP_TOL_CH4: f64 = 1.0;
const TEMP_TOL_COLDSIDE: f64 = 0.5;
const TEMP_TOL_HOTPLATE: f64 = 3.0;
const WAIT_BASELINES_MIN_SECS: f64 = 240.0;
/// Full-stroke syringe position used to push a sample into the analyzer.
const SAMPLE_PUSH_POSITION: i64 = 1000;

impl ProcessController {
    pub fn new(
        settings: Settings,
        cmd: CommandClient,
        actuator_link: Box<dyn crate::serial_transport::LineChannel>,
        calib: Calibration,
    ) -> Self {
        let curves = CalibCurves::compute(&calib);
        Self {
            settings,
            cmd,
            actuator_link,
            calib,
            curves,
            t0: Instant::now(),
            tgs_comp: 0.0,
            calib_tgs_base: 0.0,
            exam_tgs_baseline: 0.0,
            exam_h2_baseline: 0.0,
            exam_o2_baseline: 0.0,
        }
    }

    fn elapsed(&self) -> f64 {
        self.t0.elapsed().as_secs_f64()
    }

    fn reset_t0(&mut self) {
        self.t0 = Instant::now();
    }

    async fn set_valves(&mut self, mask: u8) -> Result<()> {
        self.cmd.send_ok(&format!(":dout0:write {mask}")).await?;
        Ok(())
    }

    async fn boot_pids(&mut self) -> Result<()> {
        self.cmd.send_ok(":dout0.0:write 1").await?; // purge pump
        self.cmd.send_ok(":dout0.1:write 1").await?; // cooling fan 1
        self.cmd.send_ok(":dout0.2:write 1").await?; // cooling fan 2
        self.cmd.send_ok(":pwm3:outp:ena").await?; // coldplate PID
        self.cmd.send_ok(":pwm4:outp:ena").await?; // hotplate PID
        Ok(())
    }

    async fn motor_off(&mut self) -> Result<bool> {
        let mut actuator = actuator::Actuator::new(self.actuator_link.as_mut());
        Ok(!actuator.motor_on()?)
    }

    async fn drift(&mut self, label: &str, interval: f64) -> Result<f64> {
        self.cmd
            .read_f64(&format!(":CMD:BASE:DRIFT? {label},{interval}"))
            .await
    }

    async fn read_at(&mut self, label: &str, t: f64, window: f64) -> Result<f64> {
        self.cmd
            .read_f64(&format!(":CMD:READ? {label},{t},{window}"))
            .await
    }

    /// Median over the `window` seconds ending at the newest ring sample
    /// (`:CMD:READ? <label>,MAX,<window>`), used for pre-push exam baselines.
    async fn read_at_max(&mut self, label: &str, window: f64) -> Result<f64> {
        self.cmd
            .read_f64(&format!(":CMD:READ? {label},MAX,{window}"))
            .await
    }

    /// Runs the requested procedure to completion, returning the process
    /// exit code per spec.md §6 (0 success, 1 fatal error).
    pub async fn run(&mut self, procedure: Procedure) -> Result<i32> {
        let mut state = ProcessState::Init;
        let mut procedure = Some(procedure);
        loop {
            info!("{:?}", state);
            state = match state {
                ProcessState::Init => self.step_init().await?,
                ProcessState::TempStabilizing => self.step_temp_stabilizing().await?,
                ProcessState::WaitBaselines => {
                    self.step_wait_baselines(procedure.take()).await?
                }
                ProcessState::CalibB0WaitDrift => self.step_calib_wait_drift().await?,
                ProcessState::CalibB0WaitT105 => self.step_calib_wait_t105().await?,
                ProcessState::ExamStart => self.step_exam_start().await?,
                ProcessState::ExamPushing => self.step_exam_pushing().await?,
                ProcessState::ExamWaitT107 => self.step_exam_wait_t107().await?,
                ProcessState::Wash { cycles_remaining } => {
                    self.step_wash(cycles_remaining).await?
                }
                ProcessState::Fill { target } => self.step_fill(target).await?,
                ProcessState::Empty => self.step_empty().await?,
                ProcessState::Home => self.step_home().await?,
                ProcessState::BreathOpen => self.step_breath_open().await?,
                ProcessState::Exit => return Ok(0),
            };
        }
    }

    async fn step_init(&mut self) -> Result<ProcessState> {
        self.curves = CalibCurves::compute(&self.calib);
        self.boot_pids().await?;
        Ok(ProcessState::TempStabilizing)
    }

    async fn step_temp_stabilizing(&mut self) -> Result<ProcessState> {
        loop {
            let ch4_temp = self.cmd.read_f64(":CMD:READ? CH4_TEMP").await?;
            let ch4_setpoint = self.cmd.read_f64(":CMD:READ? CH4_PID").await?;
            let coldside = self.cmd.read_f64(":CMD:READ? COLDSIDE_TEMP").await?;
            let coldside_setpoint = self.cmd.read_f64(":CMD:READ? COLDPLATE_PID").await?;
            let hotplate = self.cmd.read_f64(":CMD:READ? HOTPLATE_TEMP").await?;
            let hotplate_setpoint = self.cmd.read_f64(":CMD:READ? HOTPLATE_PID").await?;

            if (ch4_temp - ch4_setpoint).abs() <= TEMP_TOL_CH4
                && (coldside - coldside_setpoint).abs() <= TEMP_TOL_COLDSIDE
                && (hotplate - hotplate_setpoint).abs() <= TEMP_TOL_HOTPLATE
            {
                return Ok(ProcessState::WaitBaselines);
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn step_wait_baselines(
        &mut self,
        procedure: Option<Procedure>,
    ) -> Result<ProcessState> {
        self.reset_t0();
        loop {
            let h2_drift = self.drift("H2", 60.0).await? * 1e3;
            let ch4_drift = self.drift("CH4", 60.0).await? * 1e3;
            let stable = h2_drift.abs() <= self.settings.h2_base_drift_mv_per_min
                && ch4_drift.abs() <= self.settings.ch4_base_drift_mv_per_min;

            if stable && self.elapsed() >= WAIT_BASELINES_MIN_SECS {
                return match procedure {
                    Some(Procedure::Boot) => Ok(ProcessState::CalibB0WaitDrift),
                    Some(Procedure::Exam) | None => Ok(ProcessState::ExamStart),
                    Some(Procedure::Wash(cycles)) => {
                        Ok(ProcessState::Wash { cycles_remaining: cycles })
                    }
                    Some(Procedure::Fill(target)) => Ok(ProcessState::Fill { target }),
                    Some(Procedure::Empty) => Ok(ProcessState::Empty),
                    Some(Procedure::Home) => Ok(ProcessState::Home),
                    Some(Procedure::BreathOpen) => Ok(ProcessState::BreathOpen),
                };
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
    }

    async fn step_calib_wait_drift(&mut self) -> Result<ProcessState> {
        loop {
            let ch4_drift = self.drift("CH4", 60.0).await? * 1e3;
            if ch4_drift.abs() <= self.settings.ch4_base_drift_mv_per_min {
                break;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        self.set_valves(ValveMask::STILL).await?;
        self.cmd.send_ok(":CMD:TIME:RST").await?;
        self.reset_t0();
        self.calib_tgs_base = self.read_at("CH4", 0.0, 1.0).await?;
        Ok(ProcessState::CalibB0WaitT105)
    }

    async fn step_calib_wait_t105(&mut self) -> Result<ProcessState> {
        loop {
            if self.elapsed() >= 107.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let tgs_t105 = self.read_at("CH4", 105.5, 1.0).await?;
        self.tgs_comp = tgs_t105 - self.calib_tgs_base;
        self.calib.set("tgs_comp", self.tgs_comp);
        self.curves = CalibCurves::compute(&self.calib);
        self.set_valves(0).await?;
        Ok(ProcessState::WaitBaselines)
    }

    async fn step_exam_start(&mut self) -> Result<ProcessState> {
        self.exam_tgs_baseline = self.read_at_max("CH4", 1.0).await?;
        self.exam_h2_baseline = self.read_at_max("H2", 1.0).await?;
        self.exam_o2_baseline = self.read_at_max("O2", 1.0).await?;
        let tgs_drift = self.drift("CH4", 60.0).await? * 1e3;
        let h2_drift = self.drift("H2", 60.0).await? * 1e3;
        info!(
            "exam baselines: CH4={:.6} (drift {tgs_drift:.2}mV/min) H2={:.6} (drift {h2_drift:.2}mV/min) O2={:.2}%",
            self.exam_tgs_baseline, self.exam_h2_baseline, self.exam_o2_baseline
        );
        {
            let mut actuator = actuator::Actuator::new(self.actuator_link.as_mut());
            actuator.set_speed(350)?;
            actuator.goto(SAMPLE_PUSH_POSITION)?;
        }
        Ok(ProcessState::ExamPushing)
    }

    async fn step_exam_pushing(&mut self) -> Result<ProcessState> {
        self.wait_motor_off().await?;
        self.cmd.send_ok(":CMD:TIME:RST").await?;
        self.reset_t0();
        self.set_valves(ValveMask::STILL | ValveMask::COOLING2 | ValveMask::COOLING1 | ValveMask::PUMP)
            .await?;
        Ok(ProcessState::ExamWaitT107)
    }

    async fn step_exam_wait_t107(&mut self) -> Result<ProcessState> {
        loop {
            if self.elapsed() >= 107.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        let rhum = self.cmd.read_f64(":CMD:READ? AHT10_RHUM").await?;
        let o2_meas = self.read_at("O2", 105.0, 1.0).await?;
        let o2_val = o2_meas - self.exam_o2_baseline;
        let tgs_meas = self.read_at("CH4", 105.0, 1.0).await?;
        let tgs_val = (tgs_meas - self.exam_tgs_baseline) + self.tgs_comp;
        let peak_reply = self.cmd.send_ok(":CMD:PEAK? H2,-60,1200").await?;
        let h2_peak_meas = peak_reply
            .split_once(',')
            .and_then(|(_, v)| v.parse::<f64>().ok())
            .unwrap_or(f64::NAN);
        let h2_val = h2_peak_meas - self.exam_h2_baseline;

        self.set_valves(ValveMask::COOLING2 | ValveMask::COOLING1 | ValveMask::PUMP)
            .await?;

        if let Some(curves) = &self.curves {
            let (h2_ppm, ch4_ppm) = curves.calc_ppm(h2_val, tgs_val);
            info!("exam result: H2={h2_ppm:.2}ppm CH4={ch4_ppm:.2}ppm O2={o2_val:.2}% rel_hum={rhum:.2}%");
        }
        Ok(ProcessState::WaitBaselines)
    }

    async fn step_wash(&mut self, cycles_remaining: u32) -> Result<ProcessState> {
        const RUN: u8 = ValveMask::SYRINGE | ValveMask::INTAKE | ValveMask::COOLING2 | ValveMask::COOLING1 | ValveMask::PUMP;
        const IDLE: u8 = ValveMask::COOLING2 | ValveMask::COOLING1 | ValveMask::PUMP;
        if cycles_remaining == 0 {
            self.set_valves(IDLE).await?;
            return Ok(ProcessState::Exit);
        }
        self.set_valves(RUN).await?;
        {
            let mut actuator = actuator::Actuator::new(self.actuator_link.as_mut());
            actuator.set_speed(350)?;
            actuator.goto(50)?;
        }
        self.wait_motor_off().await?;
        self.set_valves(RUN).await?;
        {
            let mut actuator = actuator::Actuator::new(self.actuator_link.as_mut());
            actuator.set_speed(350)?;
            actuator.goto(0)?;
        }
        self.wait_motor_off().await?;
        Ok(ProcessState::Wash {
            cycles_remaining: cycles_remaining - 1,
        })
    }

    async fn step_fill(&mut self, target: i64) -> Result<ProcessState> {
        const RUN: u8 = ValveMask::SYRINGE | ValveMask::COOLING2 | ValveMask::COOLING1 | ValveMask::PUMP;
        const IDLE: u8 = ValveMask::COOLING2 | ValveMask::COOLING1 | ValveMask::PUMP;
        self.set_valves(RUN).await?;
        {
            let mut actuator = actuator::Actuator::new(self.actuator_link.as_mut());
            actuator.set_speed(200)?;
            actuator.goto(target)?;
        }
        self.wait_motor_off().await?;
        self.set_valves(IDLE).await?;
        Ok(ProcessState::Exit)
    }

    async fn step_empty(&mut self) -> Result<ProcessState> {
        const RUN: u8 = ValveMask::SYRINGE | ValveMask::INTAKE | ValveMask::COOLING2 | ValveMask::COOLING1 | ValveMask::PUMP;
        const IDLE: u8 = ValveMask::COOLING2 | ValveMask::COOLING1 | ValveMask::PUMP;
        self.set_valves(RUN).await?;
        {
            let mut actuator = actuator::Actuator::new(self.actuator_link.as_mut());
            actuator.set_speed(350)?;
            actuator.goto(0)?;
        }
        self.wait_motor_off().await?;
        self.set_valves(IDLE).await?;
        Ok(ProcessState::Exit)
    }

    async fn step_home(&mut self) -> Result<ProcessState> {
        const IDLE: u8 = ValveMask::COOLING2 | ValveMask::COOLING1 | ValveMask::PUMP;
        self.set_valves(IDLE).await?;
        {
            let mut actuator = actuator::Actuator::new(self.actuator_link.as_mut());
            actuator.home()?;
        }
        self.wait_motor_off().await?;
        self.set_valves(IDLE).await?;
        Ok(ProcessState::Exit)
    }

    async fn step_breath_open(&mut self) -> Result<ProcessState> {
        const OPEN: u8 = ValveMask::SYRINGE | ValveMask::COOLING2 | ValveMask::COOLING1 | ValveMask::PUMP;
        self.set_valves(OPEN).await?;
        Ok(ProcessState::Exit)
    }

    async fn wait_motor_off(&mut self) -> Result<()> {
        loop {
            if self.motor_off().await? {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
}
