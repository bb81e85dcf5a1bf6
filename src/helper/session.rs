//! A write-once cache for the wallet keys fetched from the device.
//!
//! Readers must never observe a half-populated session, so publication happens once,
//! atomically, via [`std::sync::OnceLock`] rather than a lock a reader could catch
//! mid-write.

use std::sync::OnceLock;

use crate::types::{Address, KeyPair};

#[derive(Debug, Clone)]
pub struct SessionData {
    pub spend: KeyPair,
    pub view: KeyPair,
    pub address: Address,
}

#[derive(Debug, Default)]
pub struct Session {
    data: OnceLock<SessionData>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            data: OnceLock::new(),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.data.get().is_some()
    }

    pub fn get(&self) -> Option<&SessionData> {
        self.data.get()
    }

    /// Publish the session data. A second publish (lost race with a concurrent
    /// `fetch_keys`) is a harmless no-op: both callers computed the same device state.
    pub fn publish(&self, data: SessionData) {
        let _ = self.data.set(data);
    }
}
