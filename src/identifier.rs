//! Bean identifier generation.

use crate::error::{BeanError, Result};
use crate::locality::Locality;
use crate::types::Identifier;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};
use uuid::Uuid;

/// Generates unique bean identifiers.
pub trait IdentifierFactory<I>: Send + Sync {
    /// Generate a new identifier.
    fn create_identifier(&self) -> Result<I>;

    /// Begin generating.
    fn start(&self) {}

    /// Stop generating.
    fn stop(&self) {}
}

/// Random v4 UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidIdentifierFactory;

impl IdentifierFactory<Uuid> for UuidIdentifierFactory {
    fn create_identifier(&self) -> Result<Uuid> {
        Ok(Uuid::new_v4())
    }
}

impl IdentifierFactory<String> for UuidIdentifierFactory {
    fn create_identifier(&self) -> Result<String> {
        Ok(Uuid::new_v4().to_string())
    }
}

/// Generates identifiers whose primary owner is the local node.
///
/// Candidates come from an inner factory; the first one local under the
/// cache's live locality wins. After `attempts` misses the last candidate is
/// used anyway, so generation never blocks on an unlucky ring.
pub struct AffinityIdentifierFactory<I> {
    inner: Arc<dyn IdentifierFactory<I>>,
    locality: Locality,
    attempts: usize,
    running: AtomicBool,
}

impl<I: Identifier> AffinityIdentifierFactory<I> {
    /// Create a stopped factory.
    pub fn new(inner: Arc<dyn IdentifierFactory<I>>, locality: Locality, attempts: usize) -> Self {
        Self {
            inner,
            locality,
            attempts: attempts.max(1),
            running: AtomicBool::new(false),
        }
    }

    /// Whether the factory has been started.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl<I: Identifier> IdentifierFactory<I> for AffinityIdentifierFactory<I> {
    fn create_identifier(&self) -> Result<I> {
        if !self.is_running() {
            return Err(BeanError::NotStarted("identifier factory stopped".into()).into());
        }

        let mut candidate = self.inner.create_identifier()?;
        for attempt in 1..self.attempts {
            if self.locality.is_local(&candidate) {
                trace!(attempt, "Generated local identifier");
                return Ok(candidate);
            }
            candidate = self.inner.create_identifier()?;
        }
        if !self.locality.is_local(&candidate) {
            debug!(attempts = self.attempts, "No local identifier found, using a remote one");
        }
        Ok(candidate)
    }

    fn start(&self) {
        self.inner.start();
        self.running.store(true, Ordering::Release);
    }

    fn stop(&self) {
        self.running.store(false, Ordering::Release);
        self.inner.stop();
    }
}
