//! Shared locking utilities.
//!
//! The registries guard their collections with `RwLock`. Lock poisoning is
//! recovered by taking the inner data: writers only panic between consistent
//! states here, since every collection mutation is a single insert.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub(crate) fn read_lock<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn write_lock<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}
