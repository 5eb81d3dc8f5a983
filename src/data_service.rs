//! Data Service: TCP port B (spec.md §4.5).
//!
//! Grounded in `daq_server.py`'s `data_handler`/`data_server_listener` for
//! the exact `:DATA:READ?` windowing semantics, and in the teacher's
//! `src/network/session.rs` for the subscriber-bookkeeping idiom (a shared
//! map guarded by a lock, cleaned up on handler exit).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use log::{info, warn};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Mutex, Notify, RwLock};

use crate::query;
use crate::ring::SampleRing;
use crate::sensor::SensorCatalog;

/// Bound on each subscriber FIFO. Per spec.md §4.5's Open Question
/// resolution: on overflow, drop the oldest queued record (newest wins).
const SUBSCRIBER_QUEUE_CAPACITY: usize = 4096;

/// A bounded FIFO of not-yet-sent lines for one `:DATA:LISTEN` subscriber.
/// A plain `mpsc::Sender` can only fail a full send, never evict an entry
/// already sitting in the receiver's buffer, so overflow here is handled
/// explicitly: the oldest queued line is popped to make room for the
/// newest one, per spec.md's drop-oldest backpressure policy.
struct SubscriberQueue {
    lines: Mutex<VecDeque<String>>,
    notify: Notify,
}

impl SubscriberQueue {
    fn new() -> Self {
        Self {
            lines: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
        }
    }

    async fn push(&self, line: String) {
        let mut lines = self.lines.lock().await;
        if lines.len() >= SUBSCRIBER_QUEUE_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(line);
        self.notify.notify_one();
    }

    /// Drains everything currently queued, waiting for at least one line.
    async fn recv_batch(&self) -> Vec<String> {
        loop {
            {
                let mut lines = self.lines.lock().await;
                if !lines.is_empty() {
                    return lines.drain(..).collect();
                }
            }
            self.notify.notified().await;
        }
    }
}

/// Formats one record identically for live streaming and historical dump:
/// `<t>s,<v0><u0>,<v1><u1>,...` (spec.md §6).
pub fn format_record(record: &crate::ring::SampleRecord, catalog: &SensorCatalog) -> String {
    let mut parts = vec![format!("{}s", record.t)];
    for (i, sensor) in catalog.iter().enumerate() {
        let raw = record.values.get(i).copied().unwrap_or(f64::NAN);
        parts.push(sensor.format_value(raw));
    }
    parts.join(",")
}

/// Shared state reachable from every Data Service connection handler, plus
/// the producer side used by the supervisor loop to fan out new samples.
pub struct DataServiceState {
    pub ring: Arc<RwLock<SampleRing>>,
    pub catalog: Arc<SensorCatalog>,
    pub terminate: Arc<tokio::sync::Notify>,
    subscribers: Arc<RwLock<HashMap<u64, Arc<SubscriberQueue>>>>,
    next_subscriber_id: AtomicU64,
}

impl DataServiceState {
    pub fn new(
        ring: Arc<RwLock<SampleRing>>,
        catalog: Arc<SensorCatalog>,
        terminate: Arc<tokio::sync::Notify>,
    ) -> Self {
        Self {
            ring,
            catalog,
            terminate,
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            next_subscriber_id: AtomicU64::new(0),
        }
    }

    /// Called by the supervisor loop for every newly appended sample. Never
    /// blocks the producer: a full subscriber queue drops its oldest queued
    /// line to make room, per spec.md §4.5's backpressure policy.
    pub async fn publish(&self, record: &crate::ring::SampleRecord) {
        let line = format_record(record, &self.catalog);
        let subscribers = self.subscribers.read().await;
        for queue in subscribers.values() {
            queue.push(line.clone()).await;
        }
    }
}

pub async fn serve(addr: &str, state: Arc<DataServiceState>) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("data service listening on {addr}");
    loop {
        let (socket, peer) = listener.accept().await?;
        let state = state.clone();
        info!("data client connected: {peer}");
        tokio::spawn(async move {
            if let Err(e) = handle_connection(socket, state).await {
                warn!("data handler for {peer} ended: {e}");
            }
            info!("data client disconnected: {peer}");
        });
    }
}

async fn handle_connection(
    socket: TcpStream,
    state: Arc<DataServiceState>,
) -> anyhow::Result<()> {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let request = line.trim();
        if request.is_empty() {
            continue;
        }
        let upper = request.to_ascii_uppercase();
        if upper.starts_with(":DATA:LISTEN") {
            stream_loop(&mut writer, &state).await?;
            break;
        } else if upper.starts_with(":DATA:NAMES?") {
            let labels = state.catalog.labels().join(",");
            writer.write_all(format!("TIME,{labels}\n").as_bytes()).await?;
        } else if upper.starts_with(":DATA:READ?") {
            let response = handle_read(request, &state).await;
            writer.write_all(response.as_bytes()).await?;
        } else {
            writer.write_all(b"ERR\n").await?;
        }
    }
    Ok(())
}

async fn stream_loop(
    writer: &mut (impl AsyncWriteExt + Unpin),
    state: &Arc<DataServiceState>,
) -> anyhow::Result<()> {
    let queue = Arc::new(SubscriberQueue::new());
    let id = state.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
    state.subscribers.write().await.insert(id, queue.clone());

    let result: anyhow::Result<()> = loop {
        tokio::select! {
            batch = queue.recv_batch() => {
                let mut write_err = None;
                for line in batch {
                    if let Err(e) = writer.write_all(line.as_bytes()).await {
                        write_err = Some(e);
                        break;
                    }
                    if let Err(e) = writer.write_all(b"\n").await {
                        write_err = Some(e);
                        break;
                    }
                }
                if let Some(e) = write_err {
                    break Err(e.into());
                }
            }
            _ = state.terminate.notified() => break Ok(()),
        }
    };
    state.subscribers.write().await.remove(&id);
    result
}

/// `:DATA:READ? <t0>[, <t1>]`: materialize records in `[t0, t1]` inclusive,
/// one per line, followed by a trailing `OK`. With only `<t0>`, return the
/// single record at the nearest index.
async fn handle_read(request: &str, state: &DataServiceState) -> String {
    let args: Vec<&str> = request
        .splitn(2, '?')
        .nth(1)
        .unwrap_or("")
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect();
    if args.is_empty() {
        return "ERR: missing t0\n".to_string();
    }
    let t0 = match args[0].parse::<f64>() {
        Ok(v) => v,
        Err(_) => return "ERR: bad t0\n".to_string(),
    };

    let ring = state.ring.read().await;
    if ring.is_empty() {
        return "ERR: empty ring\n".to_string();
    }

    if args.len() == 1 {
        return match query::find_time_index(&ring, t0).and_then(|i| ring.get(i)) {
            Some(record) => format!("{}\nOK\n", format_record(record, &state.catalog)),
            None => "ERR: not found\n".to_string(),
        };
    }

    let t1 = match args[1].parse::<f64>() {
        Ok(v) => v,
        Err(_) => return "ERR: bad t1\n".to_string(),
    };
    let mut out = String::new();
    for record in ring.iter() {
        if record.t >= t0 && record.t <= t1 {
            out.push_str(&format_record(record, &state.catalog));
            out.push('\n');
        }
    }
    out.push_str("OK\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::SensorCatalog;

    #[test]
    fn format_record_matches_streaming_layout() {
        let catalog = SensorCatalog::default_catalog();
        let record = crate::ring::SampleRecord {
            seq: 0,
            t: 0.1,
            values: vec![0.0; catalog.len()],
        };
        let line = format_record(&record, &catalog);
        assert!(line.starts_with("0.1s,"));
    }

    #[tokio::test]
    async fn overflowing_subscriber_queue_drops_the_oldest_line() {
        let queue = SubscriberQueue::new();
        for i in 0..SUBSCRIBER_QUEUE_CAPACITY + 2 {
            queue.push(format!("line{i}")).await;
        }
        let batch = queue.recv_batch().await;
        assert_eq!(batch.len(), SUBSCRIBER_QUEUE_CAPACITY);
        assert_eq!(batch.first().unwrap(), "line2");
        assert_eq!(batch.last().unwrap(), &format!("line{}", SUBSCRIBER_QUEUE_CAPACITY + 1));
    }
}
