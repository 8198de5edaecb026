//! Bounded-backoff retry decorator for the persistence ports.
//!
//! Wraps any store and re-issues calls that fail with a transient error,
//! sleeping `backoff_factor * 2^(attempt-1)` seconds between attempts. Only
//! `StoreError::Transient` is retried; permanent failures (duplicate key,
//! not found) pass straight through. When the attempt budget runs out the
//! last transient failure is surfaced as `StoreError::Exhausted`.

use std::thread;
use std::time::Duration;

use tracing::warn;

use crate::config::Settings;

use super::{ChangeRecord, ChangesDataStore, DataStore, Record, StoreError};

/// Default total attempt budget.
pub const DEFAULT_MAX_RETRIES: u32 = 4;
/// Default backoff factor, in seconds.
pub const DEFAULT_BACKOFF_FACTOR: f64 = 1.2;

pub struct Retrying<S> {
    inner: S,
    max_retries: u32,
    backoff_factor: f64,
}

impl<S> Retrying<S> {
    pub fn new(inner: S) -> Self {
        Retrying {
            inner,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
        }
    }

    /// Build from the recognised settings (`KERNEL_LIB_MAX_RETRIES`,
    /// `KERNEL_LIB_BACKOFF_FACTOR`).
    pub fn from_settings(inner: S, settings: &Settings) -> Self {
        Retrying::new(inner)
            .with_max_retries(settings.lib_max_retries)
            .with_backoff_factor(settings.lib_backoff_factor)
    }

    /// Set the total attempt budget. A budget of zero still attempts once.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Set the backoff factor in seconds. Zero disables sleeping.
    pub fn with_backoff_factor(mut self, backoff_factor: f64) -> Self {
        self.backoff_factor = backoff_factor;
        self
    }

    /// Access the wrapped store.
    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn run<T>(
        &self,
        operation: &'static str,
        mut call: impl FnMut() -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let budget = self.max_retries.max(1);
        let mut attempt = 1;
        loop {
            match call() {
                Err(StoreError::Transient(reason)) => {
                    if attempt >= budget {
                        return Err(StoreError::Exhausted {
                            attempts: attempt,
                            last: reason,
                        });
                    }
                    let delay = self.backoff_factor * f64::powi(2.0, attempt as i32 - 1);
                    warn!(
                        operation,
                        attempt,
                        delay_secs = delay,
                        reason = %reason,
                        "transient backend failure, backing off"
                    );
                    if delay.is_finite() && delay > 0.0 {
                        thread::sleep(Duration::from_secs_f64(delay));
                    }
                    attempt += 1;
                }
                other => return other,
            }
        }
    }
}

impl<R: Record, S: DataStore<R>> DataStore<R> for Retrying<S> {
    fn add(&self, record: &R) -> Result<(), StoreError> {
        self.run("add", || self.inner.add(record))
    }

    fn update(&self, record: &R) -> Result<(), StoreError> {
        self.run("update", || self.inner.update(record))
    }

    fn fetch(&self, id: &str) -> Result<R, StoreError> {
        self.run("fetch", || self.inner.fetch(id))
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.run("delete", || self.inner.delete(id))
    }
}

impl<S: ChangesDataStore> ChangesDataStore for Retrying<S> {
    fn add(&self, change: ChangeRecord) -> Result<(), StoreError> {
        self.run("changes.add", || self.inner.add(change.clone()))
    }

    fn filter(&self, since: Option<&str>, limit: usize) -> Result<Vec<ChangeRecord>, StoreError> {
        self.run("changes.filter", || self.inner.filter(since, limit))
    }
}
