use super::Metadata;
use crate::error::{Result, StoreError};

pub const PERSIST_SUFFIX: &str = "_persist";

/// Marks a blob that must survive deletion requests and eviction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Persist {
    pub value: bool,
}

impl Persist {
    pub fn new(value: bool) -> Self {
        Self { value }
    }
}

impl Metadata for Persist {
    fn suffix(&self) -> &str {
        PERSIST_SUFFIX
    }

    fn movable(&self) -> bool {
        true
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.value.to_string().into_bytes())
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<()> {
        self.value = match bytes {
            b"true" => true,
            b"false" => false,
            other => {
                return Err(StoreError::MetadataError(format!(
                    "invalid persist value: {}",
                    String::from_utf8_lossy(other)
                )))
            }
        };
        Ok(())
    }
}
