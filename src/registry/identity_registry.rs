//! # Identity Registry
//!
//! Guard against two automatically-managed listeners in one process sharing
//! an identity, and therefore the same queue, service and trigger.
//!
//! Registries are cheap to clone and clones share the same set. Tests build
//! their own with [`IdentityRegistry::new`]; production code normally uses the
//! process-wide [`IdentityRegistry::global`].
//!
//! ```rust
//! use mssql_notify::registry::IdentityRegistry;
//!
//! let registry = IdentityRegistry::new();
//! registry.try_acquire(1).unwrap();
//! assert!(registry.try_acquire(1).is_err());
//!
//! registry.release(1);
//! registry.release(1); // no-op
//! assert!(registry.try_acquire(1).is_ok());
//! ```

use dashmap::DashSet;
use std::sync::{Arc, OnceLock};
use tracing::debug;

use crate::error::{ListenerError, Result};

static GLOBAL_REGISTRY: OnceLock<IdentityRegistry> = OnceLock::new();

/// Set of identities held by active listeners
#[derive(Debug, Clone, Default)]
pub struct IdentityRegistry {
    active: Arc<DashSet<i32>>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry shared by every listener in the process unless one is injected
    pub fn global() -> Self {
        GLOBAL_REGISTRY.get_or_init(IdentityRegistry::new).clone()
    }

    /// Claim `identity`, failing if another listener holds it
    pub fn try_acquire(&self, identity: i32) -> Result<()> {
        if self.active.insert(identity) {
            debug!(identity = identity, "Listener identity acquired");
            Ok(())
        } else {
            Err(ListenerError::DuplicateListener { identity })
        }
    }

    /// Give `identity` back; releasing an unknown identity does nothing
    pub fn release(&self, identity: i32) {
        if self.active.remove(&identity).is_some() {
            debug!(identity = identity, "Listener identity released");
        }
    }

    pub fn is_active(&self, identity: i32) -> bool {
        self.active.contains(&identity)
    }

    /// Identities currently held, sorted
    pub fn active_identities(&self) -> Vec<i32> {
        let mut identities: Vec<i32> = self.active.iter().map(|entry| *entry).collect();
        identities.sort_unstable();
        identities
    }
}
