use chrono::{DateTime, Utc};

use super::Metadata;
use crate::error::{Result, StoreError};

pub const LAST_ACCESS_TIME_SUFFIX: &str = "_last_access_time";

/// Last time a blob was read or written, at second granularity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LastAccessTime {
    pub time: DateTime<Utc>,
}

impl LastAccessTime {
    pub fn new(time: DateTime<Utc>) -> Self {
        Self { time }
    }
}

impl Metadata for LastAccessTime {
    fn suffix(&self) -> &str {
        LAST_ACCESS_TIME_SUFFIX
    }

    fn movable(&self) -> bool {
        true
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.time.timestamp().to_string().into_bytes())
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<()> {
        let secs: i64 = std::str::from_utf8(bytes)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| {
                StoreError::MetadataError(format!(
                    "invalid last access time: {}",
                    String::from_utf8_lossy(bytes)
                ))
            })?;
        self.time = DateTime::from_timestamp(secs, 0).ok_or_else(|| {
            StoreError::MetadataError(format!("last access time out of range: {}", secs))
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_last_access_time_movable() {
        let lat = LastAccessTime::new(Utc::now() - Duration::hours(1));
        assert!(lat.movable());
        assert_eq!(lat.suffix(), LAST_ACCESS_TIME_SUFFIX);
    }

    #[test]
    fn test_last_access_time_serialization() {
        let lat = LastAccessTime::new(Utc::now() - Duration::hours(1));
        let bytes = lat.serialize().unwrap();

        let mut parsed = LastAccessTime::default();
        parsed.deserialize(&bytes).unwrap();
        assert_eq!(parsed.time.timestamp(), lat.time.timestamp());
    }

    #[test]
    fn test_last_access_time_rejects_garbage() {
        let mut lat = LastAccessTime::default();
        assert!(matches!(
            lat.deserialize(b"yesterday"),
            Err(StoreError::MetadataError(_))
        ));
    }
}
