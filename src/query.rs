//! Query Engine: pure functions over a [`SampleRing`] snapshot (spec.md
//! §4.3).
//!
//! Grounded in `daq_server.py`'s `find_time_index`/`median_avg` and
//! `hmc_master.py`'s `h2_baseline_drift`/`tgs_baseline_drift` and the
//! `EXAM_WAIT_T107` peak-search call site, which pins the exact numeric
//! semantics (height threshold, spacing, running-max break condition).

use crate::ring::SampleRing;

/// Smallest index `i` such that `ring[i].t >= t`, clamped to the first index
/// when `t` is below the oldest record and to the last index when `t` is
/// above the newest. Returns `None` for an empty ring.
pub fn find_time_index(ring: &SampleRing, t: f64) -> Option<usize> {
    if ring.is_empty() {
        return None;
    }
    let last = ring.len() - 1;
    if t <= ring.get(0)?.t {
        return Some(0);
    }
    if t >= ring.get(last)?.t {
        return Some(last);
    }
    // Linear scan is fine at this buffer's scale (bufsize_secs worth of
    // samples at instrument sample rates); see Design Notes for rationale.
    for i in 0..=last {
        if ring.get(i)?.t >= t {
            return Some(i);
        }
    }
    Some(last)
}

fn median_of(mut values: Vec<f64>) -> f64 {
    values.retain(|v| !v.is_nan());
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    }
}

/// Median of `channel`'s raw values across `ring[start_index..=end_index]`,
/// where `start_index = find_time_index(ring[end_index].t - period)`.
/// NaN-carrying channels are skipped (spec.md §7 error policy).
pub fn median(ring: &SampleRing, channel: usize, end_index: usize, period_secs: f64) -> Option<f64> {
    let end_record = ring.get(end_index)?;
    let start_index = find_time_index(ring, end_record.t - period_secs)?;
    let values: Vec<f64> = (start_index..=end_index)
        .filter_map(|i| ring.get(i).and_then(|r| r.values.get(channel)).copied())
        .collect();
    Some(median_of(values))
}

/// Baseline drift in raw-units-per-minute. `convert` maps a raw value to
/// physical units (the caller supplies the sensor's conversion).
pub fn drift(
    ring: &SampleRing,
    channel: usize,
    interval_secs: f64,
    convert: impl Fn(f64) -> f64,
) -> Option<f64> {
    let interval = if interval_secs == 0.0 { 60.0 } else { interval_secs };
    let t_last = ring.last()?.t;
    let t_first = ring.first()?.t;
    let t0 = (t_last - interval).max(t_first);
    let idx0 = find_time_index(ring, t0)?;
    let idx1 = ring.len() - 1;
    let b0 = convert(median(ring, channel, idx0, 1.0)?);
    let b1 = convert(median(ring, channel, idx1, 1.0)?);
    Some((b1 - b0) / interval * 60.0)
}

/// Result of a successful peak search: time and converted value at the
/// running-maximum peak.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub t: f64,
    pub value: f64,
}

/// Finds the peak in `[t0, t0 + interval]` (clamped to the ring), per
/// spec.md §4.3: local maxima with minimum height
/// `convert(median(channel, index(t0), 1.0)) + 1e-3` and minimum spacing
/// `(p1 - p0) / 2`; iterate returned peaks tracking a running maximum and
/// stop at the first drop of more than `1e-3` below it. `Err` ("no peak")
/// if the final running maximum does not exceed the height threshold.
pub fn peak(
    ring: &SampleRing,
    channel: usize,
    t0: f64,
    interval_secs: f64,
    convert: impl Fn(f64) -> f64,
) -> Result<Peak, &'static str> {
    if ring.is_empty() {
        return Err("no peak");
    }
    let t1 = t0 + interval_secs;
    let idx0 = find_time_index(ring, t0).ok_or("no peak")?;
    let idx1 = find_time_index(ring, t1).ok_or("no peak")?;
    let (lo, hi) = if idx0 <= idx1 { (idx0, idx1) } else { (idx1, idx0) };

    let baseline = convert(median(ring, channel, idx0, 1.0).ok_or("no peak")?);
    let height = baseline + 1e-3;

    let xs: Vec<f64> = (lo..=hi).filter_map(|i| ring.get(i).map(|r| r.t)).collect();
    let ys: Vec<f64> = (lo..=hi)
        .filter_map(|i| ring.get(i).and_then(|r| r.values.get(channel)).copied())
        .map(&convert)
        .collect();
    if xs.len() < 3 {
        return Err("no peak");
    }
    let min_spacing = (t1 - t0) / 2.0;

    let mut peaks: Vec<(f64, f64)> = Vec::new();
    for i in 1..ys.len() - 1 {
        if ys[i].is_nan() {
            continue;
        }
        if ys[i] > ys[i - 1] && ys[i] >= ys[i + 1] && ys[i] >= height {
            if let Some(&(last_t, _)) = peaks.last() {
                if xs[i] - last_t < min_spacing {
                    continue;
                }
            }
            peaks.push((xs[i], ys[i]));
        }
    }
    if peaks.is_empty() {
        return Err("no peak");
    }

    let mut running = peaks[0];
    for &(t, v) in &peaks[1..] {
        if v > running.1 {
            running = (t, v);
        } else if running.1 - v > 1e-3 {
            break;
        }
    }

    if running.1 > height {
        Ok(Peak {
            t: running.0,
            value: running.1,
        })
    } else {
        Err("no peak")
    }
}

/// Strips a trailing unit-letter from one numeric token: one of `V`, `C`,
/// `%`, `s`, from the end only — per spec.md's Open Question resolution
/// (the original's `conv_float` is a cascade of `.replace()` over the whole
/// string; this implementation strips only a single trailing suffix).
pub fn strip_unit_suffix(token: &str) -> &str {
    for suffix in ["V", "C", "%", "s"] {
        if let Some(stripped) = token.strip_suffix(suffix) {
            return stripped;
        }
    }
    token
}

/// Parses one numeric field, stripping a trailing unit suffix first. Per
/// spec.md §7, an unparseable field becomes NaN rather than an error.
pub fn parse_field(token: &str) -> f64 {
    strip_unit_suffix(token.trim()).parse::<f64>().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ring_with(values: &[(f64, f64)]) -> SampleRing {
        let mut ring = SampleRing::new(1000.0);
        for &(t, v) in values {
            ring.append(t, vec![v]);
        }
        ring
    }

    #[test]
    fn find_time_index_clamps_below_and_above() {
        let ring = ring_with(&[(0.0, 1.0), (1.0, 2.0), (2.0, 3.0)]);
        assert_eq!(find_time_index(&ring, -5.0), Some(0));
        assert_eq!(find_time_index(&ring, 100.0), Some(2));
        assert_eq!(find_time_index(&ring, 1.0), Some(1));
    }

    #[test]
    fn median_over_window_is_true_median_not_mean() {
        let times: Vec<f64> = (1..=10).map(|i| i as f64 * 0.1).collect();
        let vals = [1.0, 1.0, 1.0, 1.0, 1.0, 9.0, 1.0, 1.0, 1.0, 1.0];
        let ring = ring_with(&times.into_iter().zip(vals).collect::<Vec<_>>());
        let m = median(&ring, 0, ring.len() - 1, 1.0).unwrap();
        assert_eq!(m, 1.0);
    }

    #[test]
    fn median_window_zero_equals_point_read() {
        let ring = ring_with(&[(0.1, 3.0), (0.2, 7.0)]);
        let m = median(&ring, 0, 1, 0.0).unwrap();
        assert_eq!(m, 7.0);
    }

    #[test]
    fn peak_on_gaussian_bump_is_found_near_center() {
        let mut ring = SampleRing::new(1000.0);
        let mut t = 0.0;
        while t <= 20.0 {
            let gauss = 0.1 + 0.8 * (-((t - 10.0).powi(2)) / (2.0 * 0.5 * 0.5)).exp();
            ring.append(t, vec![gauss]);
            t += 0.05;
        }
        let result = peak(&ring, 0, 9.0, 2.0, |v| v).unwrap();
        assert!((result.t - 10.0).abs() <= 0.1);
        assert!((result.value - 0.9).abs() <= 0.01);
    }

    #[test]
    fn peak_on_monotone_segment_is_err() {
        let mut ring = SampleRing::new(1000.0);
        for i in 0..20 {
            ring.append(i as f64 * 0.1, vec![i as f64 * 0.01]);
        }
        assert!(peak(&ring, 0, 0.0, 1.9, |v| v).is_err());
    }

    #[test]
    fn unit_suffix_strips_only_trailing_letter() {
        assert_eq!(strip_unit_suffix("0.5V"), "0.5");
        assert_eq!(strip_unit_suffix("12.3s"), "12.3");
        assert_eq!(strip_unit_suffix("no_suffix_here_V_in_middle"), "no_suffix_here_V_in_middle");
    }

    #[test]
    fn parse_field_yields_nan_on_garbage() {
        assert!(parse_field("garbage").is_nan());
        assert_eq!(parse_field("1.5V"), 1.5);
    }
}
