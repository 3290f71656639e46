//! A description similarity that answers at once for descriptions carrying a
//! marker and parks every other call until the gate opens, so a run can be
//! stopped between candidate batches.

use reconciliation_service::engine::{DescriptionSimilarity, TokenOverlap};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

pub struct GatedSimilarity {
    marker: String,
    open: Mutex<bool>,
    opened: Condvar,
}

impl GatedSimilarity {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
            open: Mutex::new(false),
            opened: Condvar::new(),
        }
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }
}

impl DescriptionSimilarity for GatedSimilarity {
    fn similarity(&self, a: &str, b: &str) -> f64 {
        if !a.contains(&self.marker) && !b.contains(&self.marker) {
            let guard = self.open.lock().unwrap();
            // Bounded so a failing test cannot hang the blocking pool.
            let _ = self
                .opened
                .wait_timeout_while(guard, Duration::from_secs(5), |open| !*open)
                .unwrap();
        }
        TokenOverlap.similarity(a, b)
    }
}
