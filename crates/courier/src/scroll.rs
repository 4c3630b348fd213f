use parking_lot::Mutex;
use std::collections::HashMap;

/// Last known scroll offset per page URL.
///
/// Last write wins. Entries never expire.
#[derive(Debug, Default)]
pub struct ScrollPositions {
    positions: Mutex<HashMap<String, f64>>,
}

impl ScrollPositions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, url: impl Into<String>, position: f64) {
        self.positions.lock().insert(url.into(), position);
    }

    pub fn get(&self, url: &str) -> Option<f64> {
        self.positions.lock().get(url).copied()
    }

    pub fn len(&self) -> usize {
        self.positions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.lock().is_empty()
    }
}
