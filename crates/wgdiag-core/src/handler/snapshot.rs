//! Latest-value snapshot

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use super::{DataHandler, HandlerError};
use crate::package::Package;

/// Latest values of one field
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotEntry {
    /// Field key
    pub key: String,
    /// Field description
    pub description: String,
    /// Last display text, if any arrived
    pub text: Option<String>,
    /// Last numeric value, if any arrived
    pub value: Option<f64>,
}

#[derive(Default)]
struct State {
    package: Option<String>,
    entries: Vec<SnapshotEntry>,
    index: HashMap<String, usize>,
}

/// Keeps the latest text and value per key, in package field order.
///
/// What a live value grid would show.
#[derive(Default)]
pub struct Snapshot {
    state: Mutex<State>,
}

impl Snapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the current package
    pub fn package(&self) -> Option<String> {
        self.lock().package.clone()
    }

    /// All entries, in field order
    pub fn entries(&self) -> Vec<SnapshotEntry> {
        self.lock().entries.clone()
    }

    /// Entry for one key
    pub fn get(&self, key: &str) -> Option<SnapshotEntry> {
        let state = self.lock();
        state.index.get(key).map(|&idx| state.entries[idx].clone())
    }
}

impl DataHandler for Snapshot {
    fn handle_text(&self, key: &str, value: &str) -> Result<(), HandlerError> {
        let mut state = self.lock();
        if let Some(&idx) = state.index.get(key) {
            state.entries[idx].text = Some(value.to_string());
        }
        Ok(())
    }

    fn handle_value(&self, key: &str, value: f64) -> Result<(), HandlerError> {
        let mut state = self.lock();
        if let Some(&idx) = state.index.get(key) {
            state.entries[idx].value = Some(value);
        }
        Ok(())
    }

    fn switch_package(&self, package: &Package) -> Result<(), HandlerError> {
        let mut state = self.lock();
        state.package = Some(package.name().to_string());
        state.entries = package
            .fields()
            .iter()
            .map(|field| SnapshotEntry {
                key: field.key().to_string(),
                description: field.description().to_string(),
                ..Default::default()
            })
            .collect();
        state.index = state
            .entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| (entry.key.clone(), idx))
            .collect();
        Ok(())
    }
}
