use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::Duration;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ImpactError, Result};

/// Conversion from raw counts to physical amplitude.
///
/// `physical = (count - bias) / sensitivity`, where the bias is `offset` when
/// given and a running per-channel mean otherwise. With `smoothing` set, the
/// peak is taken from a one-pole envelope with that time constant (seconds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    pub sensitivity: f64,
    #[serde(default)]
    pub offset: Option<f64>,
    #[serde(default)]
    pub smoothing: Option<f64>,
    #[serde(default = "default_units")]
    pub units: String,
}

fn default_units() -> String {
    "m/s".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRow {
    pub amplitude: f64,
    pub level: i32,
}

/// Non-decreasing step function from peak amplitude to intensity level.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ThresholdTable {
    rows: Vec<ThresholdRow>,
}

impl ThresholdTable {
    pub fn new(rows: Vec<ThresholdRow>) -> std::result::Result<Self, String> {
        if rows.is_empty() {
            return Err("threshold table is empty".to_string());
        }
        for (i, row) in rows.iter().enumerate() {
            if !row.amplitude.is_finite() {
                return Err(format!("row {} has a non-finite amplitude", i));
            }
            if row.level < 0 {
                return Err(format!("row {} has negative level {}", i, row.level));
            }
            if i > 0 {
                let prev = rows[i - 1];
                if row.amplitude < prev.amplitude {
                    return Err(format!(
                        "amplitude decreases at row {} ({} < {})",
                        i, row.amplitude, prev.amplitude
                    ));
                }
                if row.level < prev.level {
                    return Err(format!(
                        "level decreases at row {} ({} < {})",
                        i, row.level, prev.level
                    ));
                }
            }
        }
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Level of the highest armed row whose breakpoint is at or below `peak`.
    /// Rows before `sensitivity` are disarmed; anything below the first armed
    /// breakpoint maps to 0.
    pub fn lookup(&self, peak: f64, sensitivity: usize) -> i32 {
        let reached = self.rows.partition_point(|r| r.amplitude <= peak);
        if reached == 0 || reached - 1 < sensitivity {
            return 0;
        }
        self.rows[reached - 1].level
    }
}

/// Per-channel configuration, immutable after loading.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamConfig {
    pub source_key: String,
    pub label: Option<String>,
    pub calibration: Calibration,
    pub thresholds: ThresholdTable,
    pub probation: Option<Duration>,
    pub level: Option<i32>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawStream {
    calibration: Calibration,
    thresholds: Vec<ThresholdRow>,
    #[serde(default)]
    label: Option<String>,
    /// Seconds.
    #[serde(default)]
    probation: Option<f64>,
    #[serde(default)]
    level: Option<i32>,
}

impl RawStream {
    fn validate(self, source_key: String) -> Result<StreamConfig> {
        let fail = |msg: String| ImpactError::Config(format!("{}: {}", source_key, msg));

        if source_key.trim().is_empty() {
            return Err(ImpactError::Config("empty stream key".to_string()));
        }

        let cal = &self.calibration;
        if !cal.sensitivity.is_finite() || cal.sensitivity <= 0.0 {
            return Err(fail(format!(
                "calibration sensitivity must be positive, got {}",
                cal.sensitivity
            )));
        }
        if let Some(offset) = cal.offset
            && !offset.is_finite()
        {
            return Err(fail("calibration offset is not finite".to_string()));
        }
        if let Some(tau) = cal.smoothing
            && (!tau.is_finite() || tau <= 0.0)
        {
            return Err(fail(format!(
                "calibration smoothing must be positive seconds, got {}",
                tau
            )));
        }

        let thresholds = ThresholdTable::new(self.thresholds).map_err(fail)?;

        let probation = match self.probation {
            Some(secs) if !secs.is_finite() || secs < 0.0 => {
                return Err(fail(format!("probation must be >= 0 seconds, got {}", secs)));
            }
            Some(secs) => {
                let millis = (secs * 1000.0).round();
                let probation = (millis < i64::MAX as f64)
                    .then(|| Duration::try_milliseconds(millis as i64))
                    .flatten()
                    .ok_or_else(|| fail(format!("probation of {} seconds is out of range", secs)))?;
                Some(probation)
            }
            None => None,
        };

        Ok(StreamConfig {
            source_key: source_key.clone(),
            label: self.label,
            calibration: self.calibration,
            thresholds,
            probation,
            level: self.level,
        })
    }
}

/// Stream entries in file order, rejecting repeated keys.
struct StreamEntries(Vec<(String, RawStream)>);

impl<'de> Deserialize<'de> for StreamEntries {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = StreamEntries;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of stream keys to stream configurations")
            }

            fn visit_map<A>(self, mut map: A) -> std::result::Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries: Vec<(String, RawStream)> = Vec::new();
                while let Some(key) = map.next_key::<String>()? {
                    if entries.iter().any(|(k, _)| *k == key) {
                        return Err(de::Error::custom(format!("duplicate stream key {}", key)));
                    }
                    let value = map.next_value::<RawStream>()?;
                    entries.push((key, value));
                }
                Ok(StreamEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamFormat {
    Json,
    Toml,
    Yaml,
}

impl StreamFormat {
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("toml") => StreamFormat::Toml,
            Some("yaml") | Some("yml") => StreamFormat::Yaml,
            _ => StreamFormat::Json,
        }
    }
}

pub fn parse_streams(content: &str, format: StreamFormat) -> Result<HashMap<String, StreamConfig>> {
    let entries: StreamEntries = match format {
        StreamFormat::Json => {
            serde_json::from_str(content).map_err(|e| ImpactError::Config(e.to_string()))?
        }
        StreamFormat::Toml => {
            toml::from_str(content).map_err(|e| ImpactError::Config(e.to_string()))?
        }
        StreamFormat::Yaml => {
            serde_yaml::from_str(content).map_err(|e| ImpactError::Config(e.to_string()))?
        }
    };

    let mut streams = HashMap::with_capacity(entries.0.len());
    for (key, raw) in entries.0 {
        let stream = raw.validate(key.clone())?;
        streams.insert(key, stream);
    }
    Ok(streams)
}

/// Load the per-channel stream table. Any problem is fatal to startup.
pub fn load_streams(path: &Path) -> Result<HashMap<String, StreamConfig>> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        ImpactError::Config(format!("unable to read streams file {:?}: {}", path, e))
    })?;
    let streams = parse_streams(&content, StreamFormat::from_path(path))?;
    info!("Loaded {} stream(s) from {:?}", streams.len(), path);
    Ok(streams)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(rows: &[(f64, i32)]) -> ThresholdTable {
        ThresholdTable::new(
            rows.iter()
                .map(|&(amplitude, level)| ThresholdRow { amplitude, level })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_lookup_step_function() {
        let t = table(&[(0.0, 0), (100.0, 1), (500.0, 2)]);
        assert_eq!(t.lookup(50.0, 0), 0);
        assert_eq!(t.lookup(100.0, 0), 1);
        assert_eq!(t.lookup(499.9, 0), 1);
        assert_eq!(t.lookup(600.0, 0), 2);
    }

    #[test]
    fn test_lookup_below_first_breakpoint() {
        let t = table(&[(10.0, 3), (20.0, 4)]);
        assert_eq!(t.lookup(5.0, 0), 0);
        assert_eq!(t.lookup(10.0, 0), 3);
    }

    #[test]
    fn test_lookup_sensitivity_disarms_low_rows() {
        let t = table(&[(0.0, 0), (100.0, 1), (500.0, 2)]);
        assert_eq!(t.lookup(200.0, 0), 1);
        assert_eq!(t.lookup(200.0, 2), 0);
        assert_eq!(t.lookup(600.0, 2), 2);
    }

    #[test]
    fn test_lookup_is_monotonic() {
        let t = table(&[(1.0, 1), (2.0, 1), (4.0, 3), (4.0, 5), (9.0, 6)]);
        for s in 0..t.len() {
            let mut prev = i32::MIN;
            for step in 0..200 {
                let level = t.lookup(step as f64 * 0.05, s);
                assert!(level >= prev, "non-monotonic at {} (s={})", step, s);
                prev = level;
            }
        }
    }

    #[test]
    fn test_table_rejects_decreasing_amplitude() {
        let err = ThresholdTable::new(vec![
            ThresholdRow { amplitude: 10.0, level: 1 },
            ThresholdRow { amplitude: 5.0, level: 2 },
        ])
        .unwrap_err();
        assert!(err.contains("amplitude decreases"));
    }

    #[test]
    fn test_table_rejects_decreasing_level() {
        let err = ThresholdTable::new(vec![
            ThresholdRow { amplitude: 1.0, level: 2 },
            ThresholdRow { amplitude: 5.0, level: 1 },
        ])
        .unwrap_err();
        assert!(err.contains("level decreases"));
    }

    #[test]
    fn test_table_rejects_empty() {
        assert!(ThresholdTable::new(Vec::new()).is_err());
    }

    #[test]
    fn test_parse_json_streams() {
        let json = r#"{
            "NZ_WEL_10_HHZ": {
                "calibration": { "sensitivity": 2.0, "offset": 0.0 },
                "thresholds": [
                    { "amplitude": 0.0, "level": 0 },
                    { "amplitude": 100.0, "level": 1 }
                ],
                "probation": 30,
                "level": 1
            }
        }"#;
        let streams = parse_streams(json, StreamFormat::Json).unwrap();
        let s = &streams["NZ_WEL_10_HHZ"];
        assert_eq!(s.source_key, "NZ_WEL_10_HHZ");
        assert_eq!(s.thresholds.len(), 2);
        assert_eq!(s.probation, Some(Duration::seconds(30)));
        assert_eq!(s.level, Some(1));
        assert_eq!(s.calibration.units, "m/s");
    }

    #[test]
    fn test_parse_rejects_duplicate_keys() {
        let json = r#"{
            "NZ_WEL_10_HHZ": { "calibration": { "sensitivity": 1.0 }, "thresholds": [ { "amplitude": 0.0, "level": 0 } ] },
            "NZ_WEL_10_HHZ": { "calibration": { "sensitivity": 1.0 }, "thresholds": [ { "amplitude": 0.0, "level": 0 } ] }
        }"#;
        let err = parse_streams(json, StreamFormat::Json).unwrap_err();
        assert!(matches!(err, ImpactError::Config(_)));
        assert!(err.to_string().contains("duplicate stream key"));
    }

    #[test]
    fn test_parse_rejects_bad_sensitivity() {
        let json = r#"{
            "NZ_WEL_10_HHZ": { "calibration": { "sensitivity": 0.0 }, "thresholds": [ { "amplitude": 0.0, "level": 0 } ] }
        }"#;
        assert!(matches!(
            parse_streams(json, StreamFormat::Json),
            Err(ImpactError::Config(_))
        ));
    }

    #[test]
    fn test_parse_rejects_oversized_probation() {
        let json = r#"{
            "NZ_WEL_10_HHZ": { "calibration": { "sensitivity": 1.0 }, "probation": 1e20,
                               "thresholds": [ { "amplitude": 0.0, "level": 0 } ] }
        }"#;
        let err = parse_streams(json, StreamFormat::Json).unwrap_err();
        assert!(matches!(err, ImpactError::Config(_)));
        assert!(err.to_string().contains("out of range"));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(StreamFormat::from_path(Path::new("impact.json")), StreamFormat::Json);
        assert_eq!(StreamFormat::from_path(Path::new("impact.TOML")), StreamFormat::Toml);
        assert_eq!(StreamFormat::from_path(Path::new("impact.yml")), StreamFormat::Yaml);
        assert_eq!(StreamFormat::from_path(Path::new("impact")), StreamFormat::Json);
    }
}
