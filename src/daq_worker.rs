//! DAQ Worker: single owner of the DAQ serial link (spec.md §4.2).
//!
//! Runs on a dedicated OS thread (per Design Notes: "may be threads or a
//! subprocess in the target implementation; the contract is the same") so
//! that blocking serial reads never stall the Tokio runtime. Communicates
//! with the rest of the system purely over channels, matching
//! `examples/original_source/daq_server.py`'s `DAQ_process()` and its five
//! queues (`ctr_Q`, `cmd_Q`, `pool_Q`, `msg_Q`, `err_Q`).

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};

use crate::error::AppResult;
use crate::query::parse_field;
use crate::ring::SampleRecord;
use crate::serial_transport::LineChannel;

/// Message on the `control` channel (spec.md §4.2: "receives `ABORT`").
pub enum ControlMsg {
    Abort,
}

/// One request forwarded from a Command Service handler to the worker.
/// `reply` is the handler's own single-reader response channel — the slot
/// pool described in spec.md §3 collapses to one oneshot per request, per
/// Design Notes ("slot-index indirection ... can be eliminated").
pub struct PendingRequest {
    pub text: String,
    pub pre_wait: f64,
    pub reply: oneshot::Sender<AppResult<String>>,
}

/// Informational event emitted on the `samples`/`messages`/`errors`
/// channels toward the supervisor.
pub enum WorkerEvent {
    Sample(SampleRecord),
    Message(String),
    /// Carries `true` when the error is fatal (`ABORT`/`EXIT`): the
    /// supervisor must shut the service down.
    Error { text: String, fatal: bool },
}

/// Handle used by the Command Service and supervisor to talk to a running
/// worker thread.
#[derive(Clone)]
pub struct DaqWorkerHandle {
    requests_tx: mpsc::Sender<PendingRequest>,
    control_tx: mpsc::Sender<ControlMsg>,
}

impl DaqWorkerHandle {
    pub fn control_sender(&self) -> mpsc::Sender<ControlMsg> {
        self.control_tx.clone()
    }

    /// Submits a request and awaits its response. Spec.md §4.4 names a
    /// "command lock" serializing submit-then-await across handlers so a
    /// response can't be stolen by another handler; since each request owns
    /// its own oneshot here, no cross-handler interleaving is possible and
    /// no extra lock is required — the oneshot itself is the single-reader
    /// guarantee from Design Notes.
    pub async fn request(&self, text: impl Into<String>, pre_wait: f64) -> AppResult<String> {
        let (tx, rx) = oneshot::channel();
        let pending = PendingRequest {
            text: text.into(),
            pre_wait,
            reply: tx,
        };
        self.requests_tx
            .send(pending)
            .await
            .map_err(|_| crate::error::AppError::ChannelClosed("daq worker requests"))?;
        rx.await
            .map_err(|_| crate::error::AppError::ChannelClosed("daq worker reply"))?
    }
}

const RESYNC_OVERSIZE_THRESHOLD: usize = 100;
const KEEPALIVE_IDLE: Duration = Duration::from_secs(10);

/// Spawns the worker thread. `channels` is the ordered list of DAQ channel
/// ids (e.g. `ch0`, `ch1`, ...) used to build the continuous-mode trigger.
pub fn spawn(
    mut transport: Box<dyn LineChannel>,
    channels: Vec<String>,
    events_tx: std::sync::mpsc::Sender<WorkerEvent>,
) -> (DaqWorkerHandle, std::thread::JoinHandle<()>) {
    let (requests_tx, mut requests_rx) = mpsc::channel::<PendingRequest>(256);
    let (control_tx, mut control_rx) = mpsc::channel::<ControlMsg>(8);

    let join = std::thread::spawn(move || {
        let trigger = format!(":TRIG:CONT:READ? {}", channels.join(","));
        let mut seq: u64 = 0;
        let mut start = Instant::now();
        let mut last_write;

        // *RST, status preset, precision, integration constant, clear
        // errors: fire-and-forget per spec.md §4.2.
        let _ = transport.write_line("*RST");
        std::thread::sleep(Duration::from_millis(500));
        let _ = transport.write_line(":STAT:PRES");
        let _ = transport.write_line(":SYST:PREC 1");
        let _ = transport.write_line(":SENS:NPLC 1");
        let _ = transport.write_line("*CLS");
        let _ = transport.write_line(&trigger);
        last_write = Instant::now();

        'outer: loop {
            // 1. one non-blocking-ish sample read (bounded by the serial
            //    transport's own short read timeout).
            match transport.read_line() {
                Ok(Some(line)) => {
                    if let Some(record) = parse_sample_line(&line, &mut seq, start) {
                        let _ = events_tx.send(WorkerEvent::Sample(record));
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    let _ = events_tx.send(WorkerEvent::Message(format!(
                        "transient serial read error: {e}"
                    )));
                }
            }

            // 2. non-blocking poll of requests.
            match requests_rx.try_recv() {
                Ok(pending) => {
                    if pending.text.eq_ignore_ascii_case(":CMD:TIME:RST") {
                        let previous_wavetime = start.elapsed().as_secs_f64();
                        start = Instant::now();
                        let _ = pending.reply.send(Ok(format!("{previous_wavetime}")));
                    } else {
                        let result = serve_synchronous(
                            transport.as_mut(),
                            &pending.text,
                            pending.pre_wait,
                            &trigger,
                        );
                        last_write = Instant::now();
                        match result {
                            Ok(response) => {
                                let _ = pending.reply.send(Ok(response));
                            }
                            Err(crate::error::AppError::SyncError(msg)) => {
                                let _ = events_tx.send(WorkerEvent::Error {
                                    text: msg.clone(),
                                    fatal: true,
                                });
                                let _ = pending
                                    .reply
                                    .send(Err(crate::error::AppError::SyncError(msg)));
                                break 'outer;
                            }
                            Err(e) => {
                                let _ = pending.reply.send(Err(e));
                            }
                        }
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => break 'outer,
            }

            // 3. non-blocking poll of control.
            match control_rx.try_recv() {
                Ok(ControlMsg::Abort) => {
                    let _ = transport.write_line("Q");
                    let _ = transport.write_line("*RST");
                    let _ = events_tx.send(WorkerEvent::Message("ABORT".to_string()));
                    break 'outer;
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => break 'outer,
            }

            // 4. continuous-mode keepalive.
            if last_write.elapsed() > KEEPALIVE_IDLE {
                let _ = transport.write_line(" ");
                last_write = Instant::now();
            }
        }
    });

    (
        DaqWorkerHandle {
            requests_tx,
            control_tx,
        },
        join,
    )
}

/// Parses one continuous-mode line: `<elapsed>s,<v0>[U],<v1>[U],...`.
/// Unparseable numeric fields become NaN (spec.md §7); a malformed leading
/// field still yields a record stamped with the worker's own elapsed time.
fn parse_sample_line(line: &str, seq: &mut u64, start: Instant) -> Option<SampleRecord> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    let fields: Vec<&str> = trimmed.split(',').collect();
    if fields.is_empty() {
        return None;
    }
    let values: Vec<f64> = fields[1..].iter().map(|f| parse_field(f)).collect();
    let t = start.elapsed().as_secs_f64();
    let record = SampleRecord {
        seq: *seq,
        t,
        values,
    };
    *seq += 1;
    Some(record)
}

/// Stops continuous mode, issues one request, and resumes continuous mode.
/// Implements the §4.2 resync escalation when the synchronous response
/// comes back oversized.
fn serve_synchronous(
    transport: &mut dyn LineChannel,
    text: &str,
    pre_wait: f64,
    trigger: &str,
) -> AppResult<String> {
    transport.write_line("Q")?;
    if pre_wait > 0.0 {
        std::thread::sleep(Duration::from_secs_f64(pre_wait));
    }
    let response = send_and_maybe_read(transport, text)?;

    let response = if response
        .as_ref()
        .map(|r| r.len() > RESYNC_OVERSIZE_THRESHOLD)
        .unwrap_or(false)
    {
        resync(transport, text)?
    } else {
        response
    };

    transport.write_line(trigger)?;
    Ok(response.unwrap_or_default())
}

fn send_and_maybe_read(transport: &mut dyn LineChannel, text: &str) -> AppResult<Option<String>> {
    transport.write_line(text)?;
    if text.contains('?') {
        Ok(transport.read_line()?)
    } else {
        Ok(None)
    }
}

/// §4.2 resync escalation: `Q, sleep, Q, sleep, Q, sleep, *cls, sleep`, then
/// retry the original request. If still oversized, close/reopen the link
/// and probe `:SYST:CAP?`; a non-small probe response is a fatal
/// [`crate::error::AppError::SyncError`].
fn resync(transport: &mut dyn LineChannel, text: &str) -> AppResult<Option<String>> {
    for _ in 0..3 {
        transport.write_line("Q")?;
        std::thread::sleep(Duration::from_millis(200));
    }
    transport.write_line("*cls")?;
    std::thread::sleep(Duration::from_millis(200));

    let retried = send_and_maybe_read(transport, text)?;
    if retried.as_ref().map(|r| r.len() > RESYNC_OVERSIZE_THRESHOLD).unwrap_or(false) {
        transport.reopen()?;
        transport.write_line(":SYST:CAP?")?;
        let probe = transport.read_line()?;
        if probe.as_ref().map(|r| r.len() > RESYNC_OVERSIZE_THRESHOLD).unwrap_or(true) {
            return Err(crate::error::AppError::SyncError(
                "DAQ link did not recover after resync escalation".to_string(),
            ));
        }
        return Ok(retried);
    }
    Ok(retried)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_sample_line_extracts_values_and_assigns_seq() {
        let mut seq = 0;
        let start = Instant::now();
        let record = parse_sample_line("0.100s,0.5V,1.2C", &mut seq, start).unwrap();
        assert_eq!(record.seq, 0);
        assert_eq!(record.values, vec![0.5, 1.2]);
        assert_eq!(seq, 1);
    }

    #[test]
    fn parse_sample_line_yields_nan_for_garbage_field() {
        let mut seq = 0;
        let start = Instant::now();
        let record = parse_sample_line("0.100s,garbage", &mut seq, start).unwrap();
        assert!(record.values[0].is_nan());
    }
}
