//! Command Service: TCP port A (spec.md §4.4).
//!
//! Grounded in the teacher's `src/network/server_actor.rs` for the
//! accept-loop / per-connection-task shape, and in
//! `examples/original_source/daq_server.py`'s `cmd_handler` for the exact
//! dispatch-table semantics reproduced in the match arms below.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use log::{debug, info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

use crate::daq_worker::DaqWorkerHandle;
use crate::query;
use crate::ring::SampleRing;
use crate::sensor::SensorCatalog;

/// Shared state reachable from every Command Service connection handler.
pub struct CommandServiceState {
    pub ring: Arc<RwLock<SampleRing>>,
    pub catalog: Arc<SensorCatalog>,
    pub worker: DaqWorkerHandle,
    pub terminate: Arc<tokio::sync::Notify>,
    pub version: String,
    free_slots: Arc<AtomicUsize>,
    max_handlers: usize,
}

impl CommandServiceState {
    pub fn new(
        ring: Arc<RwLock<SampleRing>>,
        catalog: Arc<SensorCatalog>,
        worker: DaqWorkerHandle,
        terminate: Arc<tokio::sync::Notify>,
        max_handlers: usize,
    ) -> Self {
        Self {
            ring,
            catalog,
            worker,
            terminate,
            version: env!("CARGO_PKG_VERSION").to_string(),
            free_slots: Arc::new(AtomicUsize::new(max_handlers)),
            max_handlers,
        }
    }
}

/// Runs the accept loop until the listener errors or the process exits.
/// Spec.md §4.4: "accepts up to `max_handlers` concurrent connections...
/// if no slot is free, reject with `ERR` and close."
pub async fn serve(addr: &str, state: Arc<CommandServiceState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("command service listening on {addr}");
    loop {
        let (socket, peer) = listener.accept().await?;
        let state = state.clone();
        if state.free_slots.load(Ordering::SeqCst) == 0 {
            warn!("command service slot exhaustion, rejecting {peer}");
            tokio::spawn(async move {
                let mut socket = socket;
                let _ = socket.write_all(b"ERR\n").await;
            });
            continue;
        }
        state.free_slots.fetch_sub(1, Ordering::SeqCst);
        info!("command client connected: {peer}");
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, state.clone()).await {
                warn!("command handler for {peer} ended: {e}");
            }
            state.free_slots.fetch_add(1, Ordering::SeqCst);
            info!("command client disconnected: {peer}");
        });
    }
}

async fn handle_connection(
    socket: TcpStream,
    state: Arc<CommandServiceState>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        debug!("command request: {request}");
        let response = dispatch(request, &state).await;
        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        if response == "ABORT" {
            state.terminate.notify_waiters();
            break;
        }
    }
    Ok(())
}

async fn dispatch(request: &str, state: &CommandServiceState) -> String {
    let upper = request.to_ascii_uppercase();

    if upper.starts_with(":CMD:HMC:SHUTDOWN") {
        return "ABORT".to_string();
    }
    if upper.starts_with(":CMD:VERS?") {
        return state.version.clone();
    }
    if upper.starts_with(":CMD:BUFSZ?") {
        let ring = state.ring.read().await;
        return format!("{}", ring.bufsize_secs());
    }
    if upper.starts_with(":CMD:NAMES?") {
        let labels = state.catalog.labels().join(",");
        return format!("TIME,{labels}");
    }
    if upper.starts_with(":CMD:TIME:MIN?") {
        let ring = state.ring.read().await;
        return ring.first().map(|r| format!("{}", r.t)).unwrap_or_else(|| "ERR".to_string());
    }
    if upper.starts_with(":CMD:TIME:MAX?") {
        let ring = state.ring.read().await;
        return ring.last().map(|r| format!("{}", r.t)).unwrap_or_else(|| "ERR".to_string());
    }
    if upper.starts_with(":CMD:TIME:RST") {
        return match state.worker.request(":CMD:TIME:RST", 0.0).await {
            Ok(offset_str) => {
                if let Ok(offset) = offset_str.parse::<f64>() {
                    let mut ring = state.ring.write().await;
                    ring.rebase(offset);
                }
                offset_str
            }
            Err(e) => format!("ERR: {e}"),
        };
    }
    if upper.starts_with(":CMD:READ?") {
        return handle_read(request, state).await;
    }
    if upper.starts_with(":CMD:BASE:DRIFT?") {
        return handle_drift(request, state).await;
    }
    if upper.starts_with(":CMD:PEAK?") {
        return handle_peak(request, state).await;
    }
    if upper.starts_with(":CMD:DROP") {
        return handle_drop(request, state).await;
    }
    if upper.starts_with(":TRIG:CONT:READ?") {
        let rewritten = request.replacen(":CONT", "", 1);
        return forward(&rewritten, 0.0, state).await;
    }
    if upper.starts_with("*RST") || upper.starts_with(":SAV") || upper.starts_with(":RCL") {
        return forward(request, 2.0, state).await;
    }
    if upper.starts_with('*') || upper.starts_with(':') {
        return forward(request, 0.0, state).await;
    }
    "ERR".to_string()
}

async fn forward(text: &str, pre_wait: f64, state: &CommandServiceState) -> String {
    match state.worker.request(text, pre_wait).await {
        Ok(response) => response,
        Err(e) => format!("ERR: {e}"),
    }
}

fn tokenize(request: &str) -> Vec<String> {
    request
        .splitn(2, |c: char| c == '?' || c == ' ')
        .last()
        .unwrap_or("")
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

async fn handle_read(request: &str, state: &CommandServiceState) -> String {
    let args = tokenize(request);
    let ring = state.ring.read().await;
    if ring.is_empty() {
        return "ERR".to_string();
    }
    if args.first().map(|s| s.eq_ignore_ascii_case("ALL")).unwrap_or(false) {
        let last = ring.last().unwrap();
        let mut parts = vec![format!("{}", last.t)];
        for (i, sensor) in state.catalog.iter().enumerate() {
            let raw = last.values.get(i).copied().unwrap_or(f64::NAN);
            parts.push(sensor.format_value(raw));
        }
        return parts.join(",");
    }
    let label = match args.first() {
        Some(l) => l,
        None => return "ERR".to_string(),
    };
    let index = match state.catalog.index_of_label(label) {
        Some(i) => i,
        None => return "ERR".to_string(),
    };
    let sensor = state.catalog.get(index).unwrap();

    let end_index = match args.get(1).map(|s| s.to_ascii_uppercase()) {
        None => ring.len() - 1,
        Some(ref s) if s == "MAX" => ring.len() - 1,
        Some(ref s) if s == "MIN" => 0,
        Some(ref s) => match s.parse::<f64>() {
            Ok(t) => match query::find_time_index(&ring, t) {
                Some(i) => i,
                None => return "ERR".to_string(),
            },
            Err(_) => return "ERR".to_string(),
        },
    };

    let raw = match args.get(2).and_then(|w| w.parse::<f64>().ok()) {
        Some(window) => match query::median(&ring, index, end_index, window) {
            Some(v) => v,
            None => return "ERR".to_string(),
        },
        None => match ring.get(end_index) {
            Some(r) => r.values.get(index).copied().unwrap_or(f64::NAN),
            None => return "ERR".to_string(),
        },
    };
    sensor.format_value(raw)
}

async fn handle_drift(request: &str, state: &CommandServiceState) -> String {
    let args = tokenize(request);
    let label = match args.first() {
        Some(l) => l,
        None => return "ERR".to_string(),
    };
    let ring = state.ring.read().await;
    let index = match state.catalog.index_of_label(label) {
        Some(i) => i,
        None => return "ERR".to_string(),
    };
    let interval = args.get(1).and_then(|s| s.parse::<f64>().ok()).unwrap_or(60.0);
    let sensor = state.catalog.get(index).unwrap();
    let conv = sensor.conversion;
    match query::drift(&ring, index, interval, move |v| conv.convert(v)) {
        Some(d) => format!("{d}"),
        None => "ERR".to_string(),
    }
}

async fn handle_peak(request: &str, state: &CommandServiceState) -> String {
    let args = tokenize(request);
    if args.len() < 3 {
        return "ERR".to_string();
    }
    let ring = state.ring.read().await;
    let index = match state.catalog.index_of_label(&args[0]) {
        Some(i) => i,
        None => return "ERR".to_string(),
    };
    let t0 = match args[1].parse::<f64>() {
        Ok(v) => v,
        Err(_) => return "ERR".to_string(),
    };
    let interval = match args[2].parse::<f64>() {
        Ok(v) => v,
        Err(_) => return "ERR".to_string(),
    };
    let sensor = state.catalog.get(index).unwrap();
    let conv = sensor.conversion;
    match query::peak(&ring, index, t0, interval, move |v| conv.convert(v)) {
        Ok(p) => format!("{},{}", p.t, p.value),
        Err(_) => "ERR".to_string(),
    }
}

/// `:CMD:DROP [<speed>]`: pseudo-command composing several forwarded
/// requests, per spec.md §4.4's dispatch table.
async fn handle_drop(request: &str, state: &CommandServiceState) -> String {
    let args = tokenize(request);
    let speed = args.first().and_then(|s| s.parse::<f64>().ok()).unwrap_or(200.0);

    if forward(":pwm1:val min", 0.0, state).await.starts_with("ERR") {
        return "ERR".to_string();
    }
    let min_s = forward(":pwm1:min?", 0.0, state).await;
    let max_s = forward(":pwm1:max?", 0.0, state).await;
    let (min_v, max_v) = match (min_s.parse::<f64>(), max_s.parse::<f64>()) {
        (Ok(a), Ok(b)) => (a, b),
        _ => return "ERR".to_string(),
    };
    let excursion = (max_v - min_v).abs();
    if forward(&format!(":pwm1:move max, {speed}"), 0.0, state)
        .await
        .starts_with("ERR")
    {
        return "ERR".to_string();
    }
    let wait_secs = if speed > 0.0 { excursion / speed } else { 0.0 };
    tokio::time::sleep(std::time::Duration::from_secs_f64(wait_secs.max(0.0))).await;
    if forward(":pwm1:move min, max", 0.0, state)
        .await
        .starts_with("ERR")
    {
        return "ERR".to_string();
    }
    "OK".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_splits_on_question_mark_and_commas() {
        let args = tokenize(":CMD:READ? H2, MAX, 1.0");
        assert_eq!(args, vec!["H2", "MAX", "1.0"]);
    }

    #[test]
    fn tokenize_empty_args_is_empty_vec() {
        let args = tokenize(":CMD:NAMES?");
        assert!(args.is_empty());
    }
}
