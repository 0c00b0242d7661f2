//! ## thawgun-runtime::audit
//! **Running hash of everything the executor ran**
//!
//! Two runs of the same scenario execute the same items in the same order
//! exactly when their audit hashes match. Only identities go into the hash,
//! never clock readings, so runs started at different real times compare
//! equal.

use std::cell::{Cell, RefCell};

use blake3::Hasher;

pub(crate) struct Auditor {
    hasher: RefCell<Hasher>,
    items: Cell<u64>,
}

impl Auditor {
    pub(crate) fn new() -> Self {
        Self {
            hasher: RefCell::new(Hasher::new()),
            items: Cell::new(0),
        }
    }

    pub(crate) fn task(&self, id: u64) {
        self.record(b"task", id);
    }

    pub(crate) fn timer(&self, id: u64) {
        self.record(b"timer", id);
    }

    fn record(&self, kind: &[u8], id: u64) {
        let mut hasher = self.hasher.borrow_mut();
        hasher.update(kind);
        hasher.update(&id.to_le_bytes());
        self.items.set(self.items.get() + 1);
    }

    /// Number of items folded in so far.
    pub(crate) fn items(&self) -> u64 {
        self.items.get()
    }

    /// Hex digest of the current state.
    pub(crate) fn state(&self) -> String {
        hex::encode(self.hasher.borrow().finalize().as_bytes())
    }
}
