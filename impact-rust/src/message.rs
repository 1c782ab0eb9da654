use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded block of raw counts for a single channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBlock {
    /// Lookup key, e.g. `NZ_WEL_10_HHZ`.
    pub source_key: String,
    /// Normalised human label, e.g. `NZ.WEL`.
    pub channel_label: String,
    pub start_time: DateTime<Utc>,
    pub sample_rate: f64,
    pub samples: Vec<i32>,
}

/// Wire message sent whenever a channel's intensity level changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub source: String,
    #[serde(rename = "srcName")]
    pub src_name: String,
    pub time: DateTime<Utc>,
    pub level: i32,
}

impl Message {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Build a `NET.STA` label from raw header fields, dropping NUL padding and
/// turning underscores into dots.
pub fn channel_label(network: &str, station: &str) -> String {
    let raw = format!("{}.{}", network, station);
    raw.trim_end_matches('\u{0}').trim().replace('_', ".")
}

/// Build the `NET_STA_LOC_CHA` source key used to look up stream config.
pub fn source_key(network: &str, station: &str, location: &str, channel: &str) -> String {
    format!("{}_{}_{}_{}", network, station, location, channel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_wire_shape() {
        let m = Message {
            source: "NZ.WEL".to_string(),
            src_name: "NZ_WEL_10_HHZ".to_string(),
            time: Utc.with_ymd_and_hms(2024, 3, 1, 2, 3, 4).unwrap(),
            level: 3,
        };
        let value: serde_json::Value = serde_json::from_str(&m.to_json().unwrap()).unwrap();
        assert_eq!(value["source"], "NZ.WEL");
        assert_eq!(value["srcName"], "NZ_WEL_10_HHZ");
        assert_eq!(value["time"], "2024-03-01T02:03:04Z");
        assert_eq!(value["level"], 3);
    }

    #[test]
    fn test_channel_label_normalisation() {
        assert_eq!(channel_label("NZ", "WEL"), "NZ.WEL");
        assert_eq!(channel_label("NZ", "WEL_A\u{0}\u{0}"), "NZ.WEL.A");
    }

    #[test]
    fn test_source_key() {
        assert_eq!(source_key("NZ", "WEL", "10", "HHZ"), "NZ_WEL_10_HHZ");
        assert_eq!(source_key("XX", "YYY", "", "HHZ"), "XX_YYY__HHZ");
    }
}
