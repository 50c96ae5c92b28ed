//! Bounded error capture for debugging.

use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Display;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::error;

/// Errors kept before the oldest are dropped.
pub const MAX_CAPTURED_ERRORS: usize = 100;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CapturedError {
    /// Unix time in milliseconds
    pub timestamp: u64,
    pub message: String,
    pub context: Option<String>,
}

/// Ring buffer of the most recent errors.
pub struct ErrorTracker {
    entries: Mutex<VecDeque<CapturedError>>,
    capacity: usize,
}

impl Default for ErrorTracker {
    fn default() -> Self {
        Self::with_capacity(MAX_CAPTURED_ERRORS)
    }
}

impl ErrorTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Log and remember `err`.
    pub fn capture(&self, err: &dyn Display, context: Option<&str>) {
        let message = err.to_string();
        error!(error = %message, context, "SDK error");

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);

        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        if self.capacity > 0 {
            entries.push_back(CapturedError {
                timestamp,
                message,
                context: context.map(str::to_string),
            });
        }
    }

    /// Captured errors, oldest first.
    pub fn entries(&self) -> Vec<CapturedError> {
        self.entries.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
