// src/processor/timeframe.rs
use crate::error::AppError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A fixed candle duration. Buckets are aligned to the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn duration_ms(&self) -> i64 {
        match self {
            Timeframe::M1 => 60_000,
            Timeframe::M5 => 300_000,
            Timeframe::M15 => 900_000,
            Timeframe::H1 => 3_600_000,
            Timeframe::H4 => 14_400_000,
            Timeframe::D1 => 86_400_000,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }

    pub fn bucket_start(&self, timestamp_ms: i64) -> i64 {
        bucket_start(timestamp_ms, self.duration_ms())
    }
}

/// `floor(t / d) * d`, flooring towards negative infinity for pre-epoch times.
pub fn bucket_start(timestamp_ms: i64, duration_ms: i64) -> i64 {
    timestamp_ms.div_euclid(duration_ms) * duration_ms
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::ALL
            .iter()
            .copied()
            .find(|tf| tf.as_str() == s.trim())
            .ok_or_else(|| AppError::validation(format!("unknown timeframe '{}'", s)))
    }
}

impl Serialize for Timeframe {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Timeframe {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Parses a configured list such as `["1m", "1h"]`, dropping duplicates.
pub fn parse_timeframes<S: AsRef<str>>(names: &[S]) -> Result<Vec<Timeframe>, AppError> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        let tf: Timeframe = name.as_ref().parse()?;
        if !out.contains(&tf) {
            out.push(tf);
        }
    }
    if out.is_empty() {
        return Err(AppError::Config("at least one timeframe must be configured".into()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_start_aligns_down() {
        assert_eq!(bucket_start(0, 60_000), 0);
        assert_eq!(bucket_start(59_999, 60_000), 0);
        assert_eq!(bucket_start(60_000, 60_000), 60_000);
        assert_eq!(bucket_start(1_700_000_012_345, 60_000), 1_699_999_980_000);
        assert_eq!(bucket_start(-1, 60_000), -60_000);
    }

    #[test]
    fn every_timeframe_contains_its_ticks() {
        let ts = 1_700_000_123_456;
        for tf in Timeframe::ALL {
            let start = tf.bucket_start(ts);
            assert!(start <= ts && ts < start + tf.duration_ms(), "{tf}");
            assert_eq!(start % tf.duration_ms(), 0);
        }
    }

    #[test]
    fn names_round_trip() {
        for tf in Timeframe::ALL {
            assert_eq!(tf.as_str().parse::<Timeframe>().unwrap(), tf);
        }
        assert!("2m".parse::<Timeframe>().is_err());
        assert_eq!(serde_json::to_string(&Timeframe::H4).unwrap(), "\"4h\"");
    }

    #[test]
    fn configured_list_is_deduplicated() {
        let tfs = parse_timeframes(&["1m", "5m", "1m"]).unwrap();
        assert_eq!(tfs, vec![Timeframe::M1, Timeframe::M5]);
        assert!(parse_timeframes::<&str>(&[]).is_err());
        assert!(parse_timeframes(&["1w"]).is_err());
    }
}
