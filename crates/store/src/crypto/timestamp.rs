use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

const MICROS_PER_SEC: u64 = 1_000_000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TimestampError {
    #[error("invalid timestamp: {0}")]
    Invalid(String),
}

/// A wall-clock instant with microsecond resolution
///
/// Every blob embeds the timestamp of its creation. Versions, snapshots and
/// orphans are all ordered by it. The textual form is `<secs>.<micros>` with
/// the microseconds zero padded to six digits, so lexical and numeric order
/// agree for timestamps with the same number of seconds digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Timestamp {
    secs: u64,
    micros: u32,
}

impl Timestamp {
    pub fn new(secs: u64, micros: u32) -> Result<Self, TimestampError> {
        if micros as u64 >= MICROS_PER_SEC {
            return Err(TimestampError::Invalid(format!(
                "{} microseconds out of range",
                micros
            )));
        }
        Ok(Self { secs, micros })
    }

    /// Current wall-clock time
    pub fn now() -> Self {
        let micros = Utc::now().timestamp_micros().max(0) as u64;
        Self::from_micros(micros)
    }

    pub fn from_micros(total: u64) -> Self {
        Self {
            secs: total / MICROS_PER_SEC,
            micros: (total % MICROS_PER_SEC) as u32,
        }
    }

    pub fn as_micros(&self) -> u64 {
        self.secs * MICROS_PER_SEC + self.micros as u64
    }

    pub fn secs(&self) -> u64 {
        self.secs
    }

    pub fn micros(&self) -> u32 {
        self.micros
    }

    /// The next representable instant
    pub fn succ(&self) -> Self {
        Self::from_micros(self.as_micros() + 1)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        DateTime::<Utc>::from_timestamp(self.secs as i64, self.micros * 1_000)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:06}", self.secs, self.micros)
    }
}

impl FromStr for Timestamp {
    type Err = TimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (secs, micros) = s
            .split_once('.')
            .ok_or_else(|| TimestampError::Invalid(s.to_string()))?;
        if micros.len() != 6 {
            return Err(TimestampError::Invalid(s.to_string()));
        }
        let secs = secs
            .parse::<u64>()
            .map_err(|_| TimestampError::Invalid(s.to_string()))?;
        let micros = micros
            .parse::<u32>()
            .map_err(|_| TimestampError::Invalid(s.to_string()))?;
        Self::new(secs, micros)
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_display_pads_micros() {
        let ts = Timestamp::new(1_600_000_000, 42).unwrap();
        assert_eq!(ts.to_string(), "1600000000.000042");
        assert_eq!("1600000000.000042".parse::<Timestamp>().unwrap(), ts);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!("1600000000".parse::<Timestamp>().is_err());
        assert!("1600000000.42".parse::<Timestamp>().is_err());
        assert!("abc.000001".parse::<Timestamp>().is_err());
        assert!(Timestamp::new(1, 1_000_000).is_err());
    }

    #[test]
    fn test_ordering_follows_micros() {
        let a = Timestamp::new(10, 999_999).unwrap();
        let b = Timestamp::new(11, 0).unwrap();
        assert!(a < b);
        assert_eq!(a.succ(), b);
        assert_eq!(Timestamp::from_micros(b.as_micros()), b);
    }

    #[test]
    fn test_serde_as_string() {
        let ts = Timestamp::new(5, 7).unwrap();
        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"5.000007\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }
}
