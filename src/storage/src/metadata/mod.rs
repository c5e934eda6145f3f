//! Typed sidecar metadata.
//!
//! A metadata value lives next to its blob in a file named
//! `<blob-name><suffix>`. Types register a suffix pattern with a factory
//! in a process-wide registry, which lets the store reconstruct "what kind
//! of sidecar is this" from a file name found on disk.

mod last_access_time;
mod persist;

use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;
use regex::Regex;

use crate::error::{Result, StoreError};

pub use last_access_time::{LastAccessTime, LAST_ACCESS_TIME_SUFFIX};
pub use persist::{Persist, PERSIST_SUFFIX};

/// A typed value stored in a sidecar file.
pub trait Metadata: Send + Sync {
    /// File name suffix appended to the blob name.
    fn suffix(&self) -> &str;

    /// Whether the sidecar follows its blob across state transitions.
    fn movable(&self) -> bool;

    fn serialize(&self) -> Result<Vec<u8>>;

    fn deserialize(&mut self, bytes: &[u8]) -> Result<()>;
}

/// Produces an empty metadata value for a concrete suffix.
pub trait MetadataFactory: Send + Sync {
    fn create(&self, suffix: &str) -> Option<Box<dyn Metadata>>;
}

impl<F> MetadataFactory for F
where
    F: Fn(&str) -> Option<Box<dyn Metadata>> + Send + Sync,
{
    fn create(&self, suffix: &str) -> Option<Box<dyn Metadata>> {
        self(suffix)
    }
}

struct Registration {
    pattern: Regex,
    factory: Arc<dyn MetadataFactory>,
}

static REGISTRY: OnceLock<RwLock<Vec<Registration>>> = OnceLock::new();

fn registry() -> &'static RwLock<Vec<Registration>> {
    REGISTRY.get_or_init(|| {
        let builtins: [(&str, Arc<dyn MetadataFactory>); 2] = [
            (
                LAST_ACCESS_TIME_SUFFIX,
                Arc::new(|_: &str| -> Option<Box<dyn Metadata>> {
                    Some(Box::new(LastAccessTime::default()))
                }),
            ),
            (
                PERSIST_SUFFIX,
                Arc::new(|_: &str| -> Option<Box<dyn Metadata>> {
                    Some(Box::new(Persist::default()))
                }),
            ),
        ];

        let registrations = builtins
            .into_iter()
            .filter_map(|(suffix, factory)| {
                compile(&regex::escape(suffix))
                    .ok()
                    .map(|pattern| Registration { pattern, factory })
            })
            .collect();
        RwLock::new(registrations)
    })
}

/// Patterns must match the whole suffix.
fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{})$", pattern))
        .map_err(|e| StoreError::MetadataError(format!("invalid suffix pattern '{}': {}", pattern, e)))
}

/// Register a factory for every suffix matching `pattern`.
///
/// Intended for process start. Registration is additive; when several
/// patterns match a suffix the earliest registration wins.
pub fn register(pattern: &str, factory: impl MetadataFactory + 'static) -> Result<()> {
    let pattern = compile(pattern)?;
    registry().write().push(Registration {
        pattern,
        factory: Arc::new(factory),
    });
    Ok(())
}

/// Construct an empty metadata value for a suffix found on disk.
pub fn create_from_suffix(suffix: &str) -> Option<Box<dyn Metadata>> {
    if suffix.is_empty() {
        return None;
    }
    let factory = registry()
        .read()
        .iter()
        .find(|r| r.pattern.is_match(suffix))
        .map(|r| Arc::clone(&r.factory))?;
    factory.create(suffix)
}
