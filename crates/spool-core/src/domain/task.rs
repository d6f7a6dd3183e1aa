//! Task descriptors: identity + transient run state for one unit of work.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use super::TaskId;
use crate::error::CodecError;

/// The capability a concrete task type has to provide.
///
/// Restoring from disk goes through `Descriptor::<P>::from_durable_bytes`, so the
/// concrete type is fixed by the store's type parameter and `KIND` only guards
/// against reading an artifact written for a different payload type.
///
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct Upload {
///     path: String,
/// }
///
/// impl Payload for Upload {
///     const KIND: &'static str = "acme.upload.v1";
///
///     fn is_valid(&self) -> bool {
///         !self.path.is_empty()
///     }
/// }
/// ```
pub trait Payload: Serialize + DeserializeOwned + Send + Sync + 'static {
    const KIND: &'static str;

    /// Payload-specific validity. Invalid descriptors never enter a store.
    fn is_valid(&self) -> bool {
        true
    }
}

/// One schedulable unit of work.
///
/// `id`, `name` and `payload` are immutable and persisted. `running`,
/// `cancelled` and `attempts` are transient: they live only in memory and a
/// restored descriptor always starts with all three reset.
#[derive(Debug)]
pub struct Descriptor<P> {
    id: TaskId,
    name: String,
    payload: P,
    running: AtomicBool,
    cancelled: AtomicBool,
    attempts: AtomicU32,
}

#[derive(Serialize)]
struct RecordRef<'a, P> {
    kind: &'a str,
    id: TaskId,
    name: &'a str,
    payload: &'a P,
}

#[derive(Deserialize)]
struct Record<P> {
    kind: String,
    id: TaskId,
    name: String,
    payload: P,
}

impl<P: Payload> Descriptor<P> {
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>, payload: P) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            payload,
            running: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &P {
        &self.payload
    }

    pub fn is_valid(&self) -> bool {
        self.id.is_set() && self.payload.is_valid()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
    }

    /// Flag the task as cancelled. A running handler sees this at its next
    /// checkpoint; a queued one is dropped before it starts.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Number of times this descriptor was dispatched since it was created or restored.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Acquire)
    }

    pub(crate) fn begin_attempt(&self) -> u32 {
        self.attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn to_durable_bytes(&self) -> Result<Vec<u8>, CodecError> {
        let record = RecordRef {
            kind: P::KIND,
            id: self.id,
            name: &self.name,
            payload: &self.payload,
        };
        Ok(serde_json::to_vec(&record)?)
    }

    pub fn from_durable_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let record: Record<P> = serde_json::from_slice(bytes)?;
        if record.kind != P::KIND {
            return Err(CodecError::KindMismatch {
                expected: P::KIND,
                found: record.kind,
            });
        }
        Ok(Self::new(record.id, record.name, record.payload))
    }
}

impl<P: PartialEq> PartialEq for Descriptor<P> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.name == other.name && self.payload == other.payload
    }
}
