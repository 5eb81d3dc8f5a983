//! Sample Ring: bounded-time ring buffer of timestamped multi-channel
//! samples (spec.md §3, §4.3).
//!
//! Architecturally grounded in the teacher's `src/data/ring_buffer.rs`
//! (capacity-bounded buffer, single writer / many concurrent readers) but
//! not in its byte-oriented mmap/seqlock implementation — this buffer holds
//! typed `SampleRecord`s and is queried by time, not by byte offset.

use std::collections::VecDeque;

/// One acquisition record: sequence number, elapsed time in seconds, and one
/// raw value per sensor channel, aligned 1:1 with the sensor catalog order.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleRecord {
    pub seq: u64,
    pub t: f64,
    pub values: Vec<f64>,
}

/// Append-only, time-bounded buffer. A single writer (the DAQ Worker)
/// appends; readers take the shared lock from outside this type (see
/// `command_service`/`data_service`, which wrap a `SampleRing` in a
/// `tokio::sync::RwLock`).
#[derive(Debug, Default)]
pub struct SampleRing {
    records: VecDeque<SampleRecord>,
    bufsize_secs: f64,
    next_seq: u64,
}

impl SampleRing {
    pub fn new(bufsize_secs: f64) -> Self {
        Self {
            records: VecDeque::new(),
            bufsize_secs,
            next_seq: 0,
        }
    }

    /// Appends a new record with an auto-assigned strictly increasing
    /// `seq`, then evicts from the front while the window is exceeded.
    pub fn append(&mut self, t: f64, values: Vec<f64>) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.records.push_back(SampleRecord { seq, t, values });
        while let (Some(first), Some(last)) = (self.records.front(), self.records.back()) {
            if last.t - first.t > self.bufsize_secs {
                self.records.pop_front();
            } else {
                break;
            }
        }
        seq
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn last(&self) -> Option<&SampleRecord> {
        self.records.back()
    }

    pub fn first(&self) -> Option<&SampleRecord> {
        self.records.front()
    }

    pub fn get(&self, index: usize) -> Option<&SampleRecord> {
        self.records.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &SampleRecord> {
        self.records.iter()
    }

    pub fn bufsize_secs(&self) -> f64 {
        self.bufsize_secs
    }

    /// `:CMD:TIME:RST` support: rebase every record's `t` by subtracting
    /// `offset`, returning the previous newest `t` (the worker's reported
    /// `wavetime`) as required by spec.md §4.4.
    pub fn rebase(&mut self, offset: f64) {
        for record in self.records.iter_mut() {
            record.t -= offset;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_assigns_strictly_increasing_seq() {
        let mut ring = SampleRing::new(100.0);
        let s0 = ring.append(0.0, vec![1.0]);
        let s1 = ring.append(0.1, vec![2.0]);
        assert!(s1 > s0);
    }

    #[test]
    fn eviction_keeps_window_bounded() {
        let mut ring = SampleRing::new(1.0);
        for i in 0..20 {
            ring.append(i as f64 * 0.1, vec![i as f64]);
        }
        let first = ring.first().unwrap().t;
        let last = ring.last().unwrap().t;
        assert!(last - first <= 1.0 + 1e-9);
    }

    #[test]
    fn rebase_shifts_every_record() {
        let mut ring = SampleRing::new(100.0);
        ring.append(10.0, vec![1.0]);
        ring.append(20.0, vec![2.0]);
        ring.rebase(10.0);
        assert_eq!(ring.get(0).unwrap().t, 0.0);
        assert_eq!(ring.get(1).unwrap().t, 10.0);
    }
}
