use std::sync::Once;

use crate::error::Result;
use crate::metadata::{self, Metadata};

pub(crate) const MOCK_SUFFIX_ONE: &str = "_mocksuffix_one";
pub(crate) const MOCK_SUFFIX_TWO: &str = "_mocksuffix_two";
pub(crate) const MOCK_MOVABLE_SUFFIX: &str = "_mockmovable";

/// Free-form sidecar used by unit tests.
#[derive(Debug, Clone)]
pub(crate) struct MockMetadata {
    suffix: String,
    movable: bool,
    pub content: Vec<u8>,
}

impl MockMetadata {
    pub fn one() -> Self {
        Self::with_suffix(MOCK_SUFFIX_ONE, false)
    }

    pub fn two() -> Self {
        Self::with_suffix(MOCK_SUFFIX_TWO, false)
    }

    pub fn movable() -> Self {
        Self::with_suffix(MOCK_MOVABLE_SUFFIX, true)
    }

    fn with_suffix(suffix: &str, movable: bool) -> Self {
        Self {
            suffix: suffix.to_string(),
            movable,
            content: Vec::new(),
        }
    }

    pub fn with_content(mut self, content: &[u8]) -> Self {
        self.content = content.to_vec();
        self
    }
}

impl Metadata for MockMetadata {
    fn suffix(&self) -> &str {
        &self.suffix
    }

    fn movable(&self) -> bool {
        self.movable
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        Ok(self.content.clone())
    }

    fn deserialize(&mut self, bytes: &[u8]) -> Result<()> {
        self.content = bytes.to_vec();
        Ok(())
    }
}

pub(crate) fn register_mock_metadata() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        metadata::register(r"_mocksuffix_\w+", |suffix: &str| -> Option<Box<dyn Metadata>> {
            Some(Box::new(MockMetadata::with_suffix(suffix, false)))
        })
        .unwrap();
        metadata::register(MOCK_MOVABLE_SUFFIX, |_: &str| -> Option<Box<dyn Metadata>> {
            Some(Box::new(MockMetadata::movable()))
        })
        .unwrap();
    });
}
