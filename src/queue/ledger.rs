//! Tag ledger
//!
//! Debugging aid that remembers which slot every minted tag was issued for. A tag
//! later observed on a different slot means two live references share a tag, so
//! tag comparison could no longer tell them apart. That is a bug in the queue,
//! and the ledger panics with both slots rather than letting the run continue.

use super::tagged::TaggedIndex;
use parking_lot::Mutex;
use std::collections::hash_map::Entry;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub(crate) struct TagLedger {
    issued: Mutex<HashMap<u32, u32>>,
}

impl TagLedger {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Records `value`, or checks it against the slot its tag was first seen on.
    ///
    /// # Panics
    ///
    /// If the tag was already recorded for another slot.
    pub(crate) fn check(&self, value: TaggedIndex) {
        if value.is_null() {
            return;
        }
        let mut issued = self.issued.lock();
        match issued.entry(value.tag()) {
            Entry::Occupied(entry) => {
                let first = *entry.get();
                if first != value.index() {
                    panic!(
                        "tag {} issued for slot {} was observed on slot {}",
                        value.tag(),
                        first,
                        value.index()
                    );
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(value.index());
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.issued.lock().len()
    }
}
