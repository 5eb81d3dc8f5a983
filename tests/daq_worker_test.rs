//! Exercises the DAQ Worker thread against a `MockSerial` double.

mod support;

use gas_daq::daq_worker::{self, ControlMsg, WorkerEvent};
use support::MockSerial;

#[tokio::test]
async fn continuous_mode_samples_arrive_in_order() {
    let mock = MockSerial::new();
    mock.push_inbound("0.100s,0.5V");
    mock.push_inbound("0.200s,0.6V");
    mock.push_inbound("0.300s,0.7V");

    let (events_tx, events_rx) = std::sync::mpsc::channel::<WorkerEvent>();
    let (handle, join) = daq_worker::spawn(Box::new(mock.clone()), vec!["ch0".to_string()], events_tx);

    let mut seen = Vec::new();
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
    while seen.len() < 3 && std::time::Instant::now() < deadline {
        if let Ok(WorkerEvent::Sample(record)) = events_rx.recv_timeout(std::time::Duration::from_millis(200)) {
            seen.push(record);
        }
    }
    assert_eq!(seen.len(), 3);
    assert!(seen[0].seq < seen[1].seq);
    assert!(seen[1].seq < seen[2].seq);
    assert_eq!(seen[0].values, vec![0.5]);

    handle
        .control_sender()
        .send(ControlMsg::Abort)
        .await
        .unwrap();
    let _ = tokio::task::spawn_blocking(move || join.join()).await;
}

#[tokio::test]
async fn time_rst_is_intercepted_without_touching_the_instrument() {
    let mock = MockSerial::new();
    let (events_tx, _events_rx) = std::sync::mpsc::channel::<WorkerEvent>();
    let (handle, join) = daq_worker::spawn(Box::new(mock.clone()), vec!["ch0".to_string()], events_tx);

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    let reply = handle.request(":CMD:TIME:RST", 0.0).await.unwrap();
    assert!(reply.parse::<f64>().is_ok());

    // The worker must never have sent ":CMD:TIME:RST" to the instrument.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert!(!mock
        .written_lines()
        .iter()
        .any(|line| line.eq_ignore_ascii_case(":CMD:TIME:RST")));

    handle.control_sender().send(ControlMsg::Abort).await.unwrap();
    let _ = tokio::task::spawn_blocking(move || join.join()).await;
}
