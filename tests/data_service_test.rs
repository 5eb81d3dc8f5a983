//! End-to-end Data Service scenarios from spec.md §8.

use std::sync::Arc;

use gas_daq::data_service::{self, DataServiceState};
use gas_daq::ring::{SampleRecord, SampleRing};
use gas_daq::sensor::SensorCatalog;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;

async fn spawn_service() -> (String, Arc<DataServiceState>, Arc<SensorCatalog>) {
    let catalog = Arc::new(SensorCatalog::default_catalog());
    let ring = Arc::new(RwLock::new(SampleRing::new(3600.0)));
    let terminate = Arc::new(tokio::sync::Notify::new());
    let state = Arc::new(DataServiceState::new(ring, catalog.clone(), terminate));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let serve_addr = addr.clone();
    let serve_state = state.clone();
    tokio::spawn(async move {
        let _ = data_service::serve(&serve_addr, serve_state).await;
    });
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    (addr, state, catalog)
}

#[tokio::test]
async fn listen_streams_samples_as_they_are_published() {
    let (addr, state, catalog) = spawn_service().await;

    let stream = TcpStream::connect(&addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    writer.write_all(b":DATA:LISTEN\n").await.unwrap();
    let mut lines = BufReader::new(reader).lines();

    // Give the server a moment to register the subscriber before publishing.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    for i in 0..3u32 {
        let record = SampleRecord {
            seq: i as u64,
            t: i as f64 * 0.1,
            values: vec![0.0; catalog.len()],
        };
        state.publish(&record).await;
    }

    let mut received = Vec::new();
    for _ in 0..3 {
        let line = tokio::time::timeout(std::time::Duration::from_secs(1), lines.next_line())
            .await
            .expect("timed out waiting for a streamed sample")
            .unwrap()
            .unwrap();
        received.push(line);
    }
    assert!(received[0].starts_with("0s,"));
    assert!(received[1].starts_with("0.1s,"));
    assert!(received[2].starts_with("0.2s,"));
}

#[tokio::test]
async fn names_query_matches_catalog_order() {
    let (addr, _state, catalog) = spawn_service().await;
    let stream = TcpStream::connect(&addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    writer.write_all(b":DATA:NAMES?\n").await.unwrap();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();
    reader.read_line(&mut line).await.unwrap();
    assert_eq!(line.trim_end(), format!("TIME,{}", catalog.labels().join(",")));
}

#[tokio::test]
async fn read_range_dumps_records_and_terminates_with_ok() {
    let (addr, state, catalog) = spawn_service().await;
    {
        let mut ring = state.ring.write().await;
        for i in 0..5u32 {
            ring.append(i as f64 * 0.5, vec![0.0; catalog.len()]);
        }
    }

    let stream = TcpStream::connect(&addr).await.unwrap();
    let (reader, mut writer) = stream.into_split();
    writer.write_all(b":DATA:READ? 0.5,1.5\n").await.unwrap();
    let mut lines = BufReader::new(reader).lines();

    let mut collected = Vec::new();
    loop {
        let line = tokio::time::timeout(std::time::Duration::from_secs(1), lines.next_line())
            .await
            .expect("timed out waiting for a read response")
            .unwrap()
            .unwrap();
        if line == "OK" {
            break;
        }
        collected.push(line);
    }
    assert_eq!(collected.len(), 3);
    assert!(collected[0].starts_with("0.5s,"));
    assert!(collected[2].starts_with("1.5s,"));
}
