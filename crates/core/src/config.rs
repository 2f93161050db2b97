//! Core runtime configuration.
//!
//! This module defines configuration that should be resolved once at process
//! startup and then passed into core services. The intent is to avoid reading
//! process-wide environment variables during request handling, which can lead
//! to inconsistent behaviour in multi-threaded runtimes and test harnesses.

use crate::{DispenseError, DispenseResult};
use std::time::Duration;

/// Days within which an expiry date counts as "expiring soon" (3 months).
pub const DEFAULT_EXPIRY_WARNING_DAYS: i64 = 90;

/// How many times a dispense retries inventory-lock acquisition before
/// reporting a conflict.
pub const DEFAULT_LOCK_RETRIES: u32 = 1;

/// Pause between lock-acquisition attempts.
pub const DEFAULT_LOCK_BACKOFF: Duration = Duration::from_millis(2);

/// Core configuration resolved at startup.
#[derive(Clone, Debug)]
pub struct CoreConfig {
    expiry_warning_days: i64,
    lock_retries: u32,
    lock_backoff: Duration,
}

impl CoreConfig {
    /// Create a new `CoreConfig`.
    ///
    /// # Errors
    ///
    /// Returns `DispenseError::Validation` if `expiry_warning_days` is not
    /// positive.
    pub fn new(
        expiry_warning_days: i64,
        lock_retries: u32,
        lock_backoff: Duration,
    ) -> DispenseResult<Self> {
        if expiry_warning_days <= 0 {
            return Err(DispenseError::Validation(
                "expiry_warning_days must be positive".into(),
            ));
        }

        Ok(Self {
            expiry_warning_days,
            lock_retries,
            lock_backoff,
        })
    }

    pub fn expiry_warning_days(&self) -> i64 {
        self.expiry_warning_days
    }

    pub fn lock_retries(&self) -> u32 {
        self.lock_retries
    }

    pub fn lock_backoff(&self) -> Duration {
        self.lock_backoff
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            expiry_warning_days: DEFAULT_EXPIRY_WARNING_DAYS,
            lock_retries: DEFAULT_LOCK_RETRIES,
            lock_backoff: DEFAULT_LOCK_BACKOFF,
        }
    }
}
