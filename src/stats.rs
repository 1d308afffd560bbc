use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::error::{ConversionError, ErrorKind};

/// Counters shared by the workers of one batch
#[derive(Debug, Clone)]
pub struct ConversionStats {
    pub converted_count: Arc<AtomicU64>,
    pub error_count: Arc<AtomicU64>,
    pub skipped_count: Arc<AtomicU64>,
    pub original_size: Arc<AtomicU64>,
    pub converted_size: Arc<AtomicU64>,
    format_stats: Arc<Mutex<HashMap<String, u64>>>,
    errors: Arc<Mutex<Vec<FailureRecord>>>,
}

/// One failed file, as shown in summaries and reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub file: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl ConversionStats {
    pub fn new() -> Self {
        Self {
            converted_count: Arc::new(AtomicU64::new(0)),
            error_count: Arc::new(AtomicU64::new(0)),
            skipped_count: Arc::new(AtomicU64::new(0)),
            original_size: Arc::new(AtomicU64::new(0)),
            converted_size: Arc::new(AtomicU64::new(0)),
            format_stats: Arc::new(Mutex::new(HashMap::new())),
            errors: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn record_success(&self, original_size: u64, converted_size: u64) {
        self.converted_count.fetch_add(1, Ordering::Relaxed);
        self.original_size.fetch_add(original_size, Ordering::Relaxed);
        self.converted_size.fetch_add(converted_size, Ordering::Relaxed);
    }

    pub fn record_error(&self, file: String, error: &ConversionError) {
        self.error_count.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut errors) = self.errors.lock() {
            errors.push(FailureRecord {
                file,
                kind: error.kind(),
                message: error.message().to_string(),
            });
        }
    }

    pub fn record_skip(&self) {
        self.skipped_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one input by its (lowercase) source extension
    pub fn record_format(&self, format: &str) {
        if let Ok(mut stats) = self.format_stats.lock() {
            *stats.entry(format.to_string()).or_insert(0) += 1;
        }
    }

    /// Output bytes over input bytes; 0.0 until something converted
    pub fn get_size_ratio(&self) -> f64 {
        let original = self.original_size.load(Ordering::Relaxed) as f64;
        let converted = self.converted_size.load(Ordering::Relaxed) as f64;

        if original > 0.0 {
            converted / original
        } else {
            0.0
        }
    }

    pub fn get_format_stats(&self) -> HashMap<String, u64> {
        self.format_stats
            .lock()
            .map(|stats| stats.clone())
            .unwrap_or_default()
    }

    pub fn get_failures(&self) -> Vec<FailureRecord> {
        self.errors
            .lock()
            .map(|errors| errors.clone())
            .unwrap_or_default()
    }

    /// Files that reached a final state (converted, failed or skipped)
    pub fn completed(&self) -> u64 {
        self.converted_count.load(Ordering::Relaxed)
            + self.error_count.load(Ordering::Relaxed)
            + self.skipped_count.load(Ordering::Relaxed)
    }
}

impl Default for ConversionStats {
    fn default() -> Self {
        Self::new()
    }
}
