//! Utilities to deal with date-time types.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// A unix timestamp (full seconds elapsed since 1970-01-01 00:00 UTC).
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct UnixTimestamp(u64);

impl UnixTimestamp {
    /// Creates a unix timestamp from the given number of seconds.
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Creates a unix timestamp from the given system time.
    pub fn from_system(time: SystemTime) -> Self {
        let duration = time
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();

        Self(duration)
    }

    /// Returns the current timestamp.
    #[inline]
    pub fn now() -> Self {
        Self::from_system(SystemTime::now())
    }

    /// Returns the number of seconds since the UNIX epoch start.
    pub fn as_secs(self) -> u64 {
        self.0
    }

    /// Returns the timestamp `duration` earlier, saturating at the epoch.
    ///
    /// # Example
    ///
    /// ```
    /// use std::time::Duration;
    /// use carbon_common::UnixTimestamp;
    ///
    /// let ts = UnixTimestamp::from_secs(10);
    /// assert_eq!(ts.saturating_sub(Duration::from_secs(4)), UnixTimestamp::from_secs(6));
    /// assert_eq!(ts.saturating_sub(Duration::from_secs(40)), UnixTimestamp::from_secs(0));
    /// ```
    pub fn saturating_sub(self, duration: Duration) -> Self {
        Self(self.0.saturating_sub(duration.as_secs()))
    }
}

impl fmt::Debug for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UnixTimestamp({})", self.as_secs())
    }
}

impl fmt::Display for UnixTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_secs().fmt(f)
    }
}

/// An error returned from parsing [`UnixTimestamp`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseUnixTimestampError(());

impl fmt::Display for ParseUnixTimestampError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid unix timestamp")
    }
}

impl std::error::Error for ParseUnixTimestampError {}

impl std::str::FromStr for UnixTimestamp {
    type Err = ParseUnixTimestampError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ts = s.parse().or(Err(ParseUnixTimestampError(())))?;
        Ok(Self(ts))
    }
}

impl Serialize for UnixTimestamp {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u64(self.as_secs())
    }
}

impl<'de> Deserialize<'de> for UnixTimestamp {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Self::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timestamp() {
        assert_eq!(
            "1534620625".parse::<UnixTimestamp>(),
            Ok(UnixTimestamp::from_secs(1534620625))
        );
    }

    #[test]
    fn test_parse_timestamp_rejects_negative_and_fractions() {
        assert!("-1".parse::<UnixTimestamp>().is_err());
        assert!("1534620625.5".parse::<UnixTimestamp>().is_err());
        assert!("".parse::<UnixTimestamp>().is_err());
    }

    #[test]
    fn test_serde() {
        let ts = UnixTimestamp::from_secs(4711);
        assert_eq!(serde_json::to_string(&ts).unwrap(), "4711");
        assert_eq!(serde_json::from_str::<UnixTimestamp>("4711").unwrap(), ts);
    }
}
