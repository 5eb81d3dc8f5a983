//! Sensor Catalog: a static, data-driven table of sensor descriptors.
//!
//! Grounded in `hmc_master.py`'s `Sensor` class hierarchy and
//! `create_sensors()`: rather than one Rust type per sensor subclass, each
//! descriptor carries a [`Conversion`] tag plus the parameters its formula
//! needs, and dispatch is on the tag (see "Design Notes" in SPEC_FULL.md).

/// Physical unit suffix appended to a formatted value, matching the
/// instrument's own trailing-letter convention (`V`, `C`, `%`, empty).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Volts,
    Celsius,
    Percent,
    None,
}

impl Unit {
    pub fn suffix(self) -> &'static str {
        match self {
            Unit::Volts => "V",
            Unit::Celsius => "C",
            Unit::Percent => "%",
            Unit::None => "",
        }
    }
}

/// Raw-to-physical conversion formula, carried as data rather than as a
/// trait object per sensor subtype.
#[derive(Debug, Clone, Copy)]
pub enum Conversion {
    /// Value already in physical units; pass through unchanged.
    Passthrough,
    /// NTC thermistor Beta equation: `T = 1 / (1/T0 + (1/beta)*ln(r/r0)) - 273.15`,
    /// applied to a raw ADC voltage `v` via a fixed voltage divider
    /// `r = r_series * v / (v_ref - v)`.
    ThermistorBeta {
        beta: f64,
        r0_ohm: f64,
        t0_kelvin: f64,
        r_series_ohm: f64,
        v_ref: f64,
    },
    /// Platinum RTD, Callendar-Van-Dusen quadratic (above 0 C):
    /// `R = R0 * (1 + A*T + B*T^2)`, solved for `T` given measured `R`.
    Pt100 {
        r0_ohm: f64,
        a: f64,
        b: f64,
    },
    /// Linear electrochemical O2 cell: `pct = offset + gain * v`.
    O2Linear {
        offset: f64,
        gain: f64,
    },
}

impl Conversion {
    /// Converts a raw reading to its physical value. NaN in, NaN out.
    pub fn convert(&self, raw: f64) -> f64 {
        if raw.is_nan() {
            return f64::NAN;
        }
        match *self {
            Conversion::Passthrough => raw,
            Conversion::ThermistorBeta {
                beta,
                r0_ohm,
                t0_kelvin,
                r_series_ohm,
                v_ref,
            } => {
                let denom = v_ref - raw;
                if denom <= 0.0 {
                    return f64::NAN;
                }
                let r = r_series_ohm * raw / denom;
                let inv_t = 1.0 / t0_kelvin + (1.0 / beta) * (r / r0_ohm).ln();
                1.0 / inv_t - 273.15
            }
            Conversion::Pt100 { r0_ohm, a, b } => {
                // R = R0 (1 + A T + B T^2) => B R0 T^2 + A R0 T + (R0 - R) = 0
                let r = raw;
                let qa = b * r0_ohm;
                let qb = a * r0_ohm;
                let qc = r0_ohm - r;
                if qa.abs() < f64::EPSILON {
                    return -qc / qb;
                }
                let disc = qb * qb - 4.0 * qa * qc;
                if disc < 0.0 {
                    return f64::NAN;
                }
                (-qb + disc.sqrt()) / (2.0 * qa)
            }
            Conversion::O2Linear { offset, gain } => offset + gain * raw,
        }
    }
}

/// Immutable descriptor for one acquisition channel, fixed at startup.
#[derive(Debug, Clone)]
pub struct SensorDescriptor {
    /// Wire channel id, e.g. `ch0`, matching the instrument's own naming.
    pub channel: String,
    /// Human-facing label, e.g. `CH4`, `H2`, `PT100`.
    pub label: String,
    /// Display unit.
    pub unit: Unit,
    /// `printf`-style numeric format, e.g. `"{:.4}"`.
    pub format: String,
    /// Raw-to-physical conversion.
    pub conversion: Conversion,
}

impl SensorDescriptor {
    pub fn format_value(&self, raw: f64) -> String {
        let value = self.conversion.convert(raw);
        if value.is_nan() {
            return "nan".to_string();
        }
        format!("{:.*}{}", self.precision(), value, self.unit.suffix())
    }

    /// Decimal-place count declared by `self.format` (e.g. `"{:.2}"` -> `2`).
    /// `format!` can't take a runtime format string, so the template is kept
    /// for its declarative value and its precision is parsed out here.
    fn precision(&self) -> usize {
        self.format
            .split('.')
            .nth(1)
            .and_then(|rest| rest.split('}').next())
            .and_then(|digits| digits.parse::<usize>().ok())
            .unwrap_or(4)
    }
}

/// The fixed, ordered set of sensor descriptors for one instrument.
#[derive(Debug, Clone, Default)]
pub struct SensorCatalog {
    sensors: Vec<SensorDescriptor>,
}

impl SensorCatalog {
    pub fn new(sensors: Vec<SensorDescriptor>) -> Self {
        Self { sensors }
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SensorDescriptor> {
        self.sensors.iter()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.sensors.iter().map(|s| s.label.as_str()).collect()
    }

    /// Declared index of a sensor by its canonical label only — per the
    /// spec's Open Question resolution, aliases (`rel_hum`/`AHT10_RHUM`)
    /// are not accepted.
    pub fn index_of_label(&self, label: &str) -> Option<usize> {
        self.sensors
            .iter()
            .position(|s| s.label.eq_ignore_ascii_case(label))
    }

    pub fn get(&self, index: usize) -> Option<&SensorDescriptor> {
        self.sensors.get(index)
    }

    /// Builds the canonical 14-channel catalog from `hmc_master.py`'s
    /// `create_sensors()` / `daq_server.py`'s identical table.
    pub fn default_catalog() -> Self {
        let thermistor = |beta: f64| Conversion::ThermistorBeta {
            beta,
            r0_ohm: 10_000.0,
            t0_kelvin: 298.15,
            r_series_ohm: 10_000.0,
            v_ref: 3.3,
        };
        let sensors = vec![
            SensorDescriptor {
                channel: "ch0".into(),
                label: "CH4".into(),
                unit: Unit::Volts,
                format: "{:.4}".into(),
                conversion: Conversion::Passthrough,
            },
            SensorDescriptor {
                channel: "ch1".into(),
                label: "CH4_TEMP".into(),
                unit: Unit::Celsius,
                format: "{:.2}".into(),
                conversion: thermistor(3950.0),
            },
            SensorDescriptor {
                channel: "ch2".into(),
                label: "O2".into(),
                unit: Unit::Percent,
                format: "{:.3}".into(),
                conversion: Conversion::O2Linear {
                    offset: 0.0,
                    gain: 20.9 / 2.0,
                },
            },
            SensorDescriptor {
                channel: "ch3".into(),
                label: "H2".into(),
                unit: Unit::Volts,
                format: "{:.4}".into(),
                conversion: Conversion::Passthrough,
            },
            SensorDescriptor {
                channel: "ch4".into(),
                label: "HOTSIDE_TEMP".into(),
                unit: Unit::Celsius,
                format: "{:.2}".into(),
                conversion: thermistor(3950.0),
            },
            SensorDescriptor {
                channel: "ch5".into(),
                label: "PT100".into(),
                unit: Unit::Celsius,
                format: "{:.2}".into(),
                conversion: Conversion::Pt100 {
                    r0_ohm: 100.0,
                    a: 3.9083e-3,
                    b: -5.775e-7,
                },
            },
            SensorDescriptor {
                channel: "ch6".into(),
                label: "COLDSIDE_TEMP".into(),
                unit: Unit::Celsius,
                format: "{:.2}".into(),
                conversion: thermistor(3950.0),
            },
            SensorDescriptor {
                channel: "ch7".into(),
                label: "HOTPLATE_TEMP".into(),
                unit: Unit::Celsius,
                format: "{:.2}".into(),
                conversion: thermistor(3950.0),
            },
            SensorDescriptor {
                channel: "temp".into(),
                label: "AHT10_TEMP".into(),
                unit: Unit::Celsius,
                format: "{:.2}".into(),
                conversion: Conversion::Passthrough,
            },
            SensorDescriptor {
                channel: "rhum".into(),
                label: "AHT10_RHUM".into(),
                unit: Unit::Percent,
                format: "{:.2}".into(),
                conversion: Conversion::Passthrough,
            },
            SensorDescriptor {
                channel: "pwm1".into(),
                label: "SERVO".into(),
                unit: Unit::Percent,
                format: "{:.1}".into(),
                conversion: Conversion::Passthrough,
            },
            SensorDescriptor {
                channel: "pwm2".into(),
                label: "CH4_PID".into(),
                unit: Unit::Percent,
                format: "{:.1}".into(),
                conversion: Conversion::Passthrough,
            },
            SensorDescriptor {
                channel: "pwm3".into(),
                label: "COLDPLATE_PID".into(),
                unit: Unit::Percent,
                format: "{:.1}".into(),
                conversion: Conversion::Passthrough,
            },
            SensorDescriptor {
                channel: "pwm4".into(),
                label: "HOTPLATE_PID".into(),
                unit: Unit::Percent,
                format: "{:.1}".into(),
                conversion: Conversion::Passthrough,
            },
        ];
        Self::new(sensors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_catalog_has_fourteen_channels_in_declared_order() {
        let catalog = SensorCatalog::default_catalog();
        assert_eq!(catalog.len(), 14);
        assert_eq!(catalog.labels()[0], "CH4");
        assert_eq!(catalog.labels()[3], "H2");
    }

    #[test]
    fn label_lookup_is_canonical_only() {
        let catalog = SensorCatalog::default_catalog();
        assert!(catalog.index_of_label("AHT10_RHUM").is_some());
        assert!(catalog.index_of_label("rel_hum").is_none());
    }

    #[test]
    fn passthrough_conversion_is_identity() {
        assert_eq!(Conversion::Passthrough.convert(1.234), 1.234);
        assert!(Conversion::Passthrough.convert(f64::NAN).is_nan());
    }

    #[test]
    fn format_value_applies_each_sensors_own_precision() {
        let catalog = SensorCatalog::default_catalog();
        let ch4 = catalog.get(catalog.index_of_label("CH4").unwrap()).unwrap();
        assert_eq!(ch4.format_value(1.0), "1.0000V");
        let servo = catalog.get(catalog.index_of_label("SERVO").unwrap()).unwrap();
        assert_eq!(servo.format_value(1.0), "1.0%");
        let o2 = catalog.get(catalog.index_of_label("O2").unwrap()).unwrap();
        assert_eq!(o2.format_value(2.0), "20.900%");
    }

    #[test]
    fn o2_linear_scales_full_scale_voltage_to_percent() {
        let conv = Conversion::O2Linear {
            offset: 0.0,
            gain: 20.9 / 2.0,
        };
        let pct = conv.convert(2.0);
        assert!((pct - 20.9).abs() < 1e-6);
    }
}
