use std::rc::Rc;

use anyhow::Result;
use cid::Cid;
use fvm_ipld_blockstore::{Blockstore, MemoryBlockstore};

/// A [`MemoryBlockstore`] behind a reference count
///
/// Clones read and write the same blocks, so a test harness can hold one handle while an actor
/// runtime owns another.
#[derive(Debug, Clone, Default)]
pub struct SharedMemoryBlockstore {
    store: Rc<MemoryBlockstore>,
}

impl SharedMemoryBlockstore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live handles onto the underlying store
    pub fn handles(&self) -> usize {
        Rc::strong_count(&self.store)
    }
}

impl Blockstore for SharedMemoryBlockstore {
    fn get(&self, k: &Cid) -> Result<Option<Vec<u8>>> {
        self.store.get(k)
    }

    fn put_keyed(&self, k: &Cid, block: &[u8]) -> Result<()> {
        self.store.put_keyed(k, block)
    }

    fn has(&self, k: &Cid) -> Result<bool> {
        self.store.has(k)
    }
}
