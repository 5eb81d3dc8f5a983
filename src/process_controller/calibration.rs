//! Calibration file I/O: `key,value` lines with `#`-prefixed comments and a
//! timestamped header on save (spec.md §6, supplemented from
//! `hmc_master.py`'s `read_calib_file`/`save_calib_file`).

use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::Local;

/// In-memory calibration key/value set. Keys named in spec.md §6:
/// `tgs_comp`, `cell_h2_100ppm`, `cell_h2_50ppm`, `tgs_h2_100ppm`,
/// `tgs_h2_50ppm`, `tgs_ch4_100ppm`, `tgs_ch4_50ppm`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Calibration {
    values: HashMap<String, f64>,
}

impl Calibration {
    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }

    pub fn set(&mut self, key: impl Into<String>, value: f64) {
        self.values.insert(key.into(), value);
    }

    pub fn load(path: &Path) -> Result<Calibration> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading calibration file {}", path.display()))?;
        let mut values = HashMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once(',') {
                if let Ok(v) = value.trim().parse::<f64>() {
                    values.insert(key.trim().to_string(), v);
                }
            }
        }
        Ok(Calibration { values })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let mut out = String::new();
        out.push_str(&format!(
            "# calibration saved {}\n",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        let mut keys: Vec<&String> = self.values.keys().collect();
        keys.sort();
        for key in keys {
            out.push_str(&format!("{key},{}\n", self.values[key]));
        }
        std::fs::write(path, out)
            .with_context(|| format!("writing calibration file {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calib.txt");
        let mut calib = Calibration::default();
        calib.set("cell_h2_50ppm", 1.23);
        calib.set("tgs_comp", 0.05);
        calib.save(&path).unwrap();

        let loaded = Calibration::load(&path).unwrap();
        assert_eq!(loaded.get("cell_h2_50ppm"), Some(1.23));
        assert_eq!(loaded.get("tgs_comp"), Some(0.05));
    }

    #[test]
    fn ignores_comment_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calib.txt");
        std::fs::write(&path, "# header\ntgs_comp,0.1\n# trailing\n").unwrap();
        let loaded = Calibration::load(&path).unwrap();
        assert_eq!(loaded.get("tgs_comp"), Some(0.1));
    }
}
