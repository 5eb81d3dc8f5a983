//! End-to-end Command Service scenarios from spec.md §8.

mod support;

use std::sync::Arc;

use gas_daq::command_service::{self, CommandServiceState};
use gas_daq::daq_worker::{self, WorkerEvent};
use gas_daq::ring::SampleRing;
use gas_daq::sensor::SensorCatalog;
use support::MockSerial;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

async fn spawn_service() -> (String, Arc<RwLock<SampleRing>>, Arc<SensorCatalog>) {
    let catalog = Arc::new(SensorCatalog::default_catalog());
    let ring = Arc::new(RwLock::new(SampleRing::new(3600.0)));
    let terminate = Arc::new(tokio::sync::Notify::new());

    let mock = MockSerial::new();
    let (events_tx, _rx) = std::sync::mpsc::channel::<WorkerEvent>();
    let (worker, _join) = daq_worker::spawn(Box::new(mock), vec!["ch0".to_string()], events_tx);

    let state = Arc::new(CommandServiceState::new(
        ring.clone(),
        catalog.clone(),
        worker,
        terminate,
        16,
    ));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let serve_addr = addr.clone();
    tokio::spawn(async move {
        let _ = command_service::serve(&serve_addr, state).await;
    });
    // Give the listener a moment to bind before clients connect.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (addr, ring, catalog)
}

async fn ask(addr: &str, request: &str) -> String {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    writer.write_all(request.as_bytes()).await.unwrap();
    writer.write_all(b"\n").await.unwrap();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    line.trim_end().to_string()
}

#[tokio::test]
async fn basic_round_trip_vers_and_names() {
    let (addr, _ring, catalog) = spawn_service().await;
    let vers = ask(&addr, ":CMD:VERS?").await;
    assert!(!vers.is_empty());

    let names = ask(&addr, ":CMD:NAMES?").await;
    let expected = format!("TIME,{}", catalog.labels().join(","));
    assert_eq!(names, expected);
}

#[tokio::test]
async fn time_reset_rebases_the_ring_and_reports_bounds() {
    let (addr, ring, catalog) = spawn_service().await;
    {
        let mut ring = ring.write().await;
        ring.append(50.0, vec![0.0; catalog.len()]);
    }
    let min_before = ask(&addr, ":CMD:TIME:MIN?").await;
    assert_eq!(min_before, "50");

    // The worker's mocked serial link never answers "Q", so `forward` would
    // error; ":CMD:TIME:RST" is special-cased to be intercepted by the
    // worker itself and always replies with a parseable offset.
    let reset_reply = ask(&addr, ":CMD:TIME:RST").await;
    assert!(reset_reply.parse::<f64>().is_ok());
}

#[tokio::test]
async fn median_over_window_not_mean() {
    let (addr, ring, catalog) = spawn_service().await;
    let label_index = catalog.index_of_label("CH4").unwrap();
    {
        let mut ring = ring.write().await;
        let vals = [1.0, 1.0, 1.0, 1.0, 1.0, 9.0, 1.0, 1.0, 1.0, 1.0];
        for (i, v) in vals.iter().enumerate() {
            let mut row = vec![0.0; catalog.len()];
            row[label_index] = *v;
            ring.append((i + 1) as f64 * 0.1, row);
        }
    }
    let response = ask(&addr, ":CMD:READ? CH4, 1.0, 1.0").await;
    let value: f64 = response.trim_end_matches('V').parse().unwrap();
    assert!((value - 1.0).abs() < 1e-9);
}
