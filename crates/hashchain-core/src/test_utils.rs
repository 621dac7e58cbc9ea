use crate::{BlockStore, CommitOutcome, Hash};
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    blocks: BTreeMap<Hash, Vec<u8>>,
    tip: Option<Vec<u8>>,
    difficulty: Option<u32>,
}

/// In-memory `BlockStore` with raw access for corrupting entries and failing writes.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn put_raw(&self, hash: &Hash, bytes: Vec<u8>) {
        self.inner.lock().unwrap().blocks.insert(*hash, bytes);
    }

    pub fn remove_raw(&self, hash: &Hash) {
        self.inner.lock().unwrap().blocks.remove(hash);
    }

    pub fn set_tip_raw(&self, tip: Vec<u8>) {
        self.inner.lock().unwrap().tip = Some(tip);
    }

    pub fn clear_tip_raw(&self) {
        self.inner.lock().unwrap().tip = None;
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            bail!("injected write failure");
        }
        Ok(())
    }
}

impl BlockStore for MemoryStore {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().unwrap().blocks.get(hash).cloned())
    }

    fn tip(&self) -> Result<Option<Vec<u8>>> {
        Ok(self.inner.lock().unwrap().tip.clone())
    }

    fn difficulty(&self) -> Result<Option<u32>> {
        Ok(self.inner.lock().unwrap().difficulty)
    }

    fn initialize(&self, genesis: &Hash, encoded: &[u8], difficulty: u32) -> Result<bool> {
        self.check_writable()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.tip.is_some() {
            return Ok(false);
        }
        inner.blocks.insert(*genesis, encoded.to_vec());
        inner.tip = Some(genesis.to_vec());
        inner.difficulty = Some(difficulty);
        Ok(true)
    }

    fn commit(&self, expected_tip: &Hash, hash: &Hash, encoded: &[u8]) -> Result<CommitOutcome> {
        self.check_writable()?;
        let mut inner = self.inner.lock().unwrap();
        if inner.tip.as_deref() != Some(&expected_tip[..]) {
            return Ok(CommitOutcome::TipMoved(inner.tip.clone()));
        }
        inner.blocks.insert(*hash, encoded.to_vec());
        inner.tip = Some(hash.to_vec());
        Ok(CommitOutcome::Committed)
    }

    fn block_count(&self) -> Result<usize> {
        Ok(self.inner.lock().unwrap().blocks.len())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Reports a fixed, outdated tip while committing against the real store.
pub struct StaleTipStore {
    inner: Arc<MemoryStore>,
    stale: Hash,
}

impl StaleTipStore {
    pub fn new(inner: Arc<MemoryStore>, stale: Hash) -> Self {
        Self { inner, stale }
    }
}

impl BlockStore for StaleTipStore {
    fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
        self.inner.get(hash)
    }

    fn tip(&self) -> Result<Option<Vec<u8>>> {
        Ok(Some(self.stale.to_vec()))
    }

    fn difficulty(&self) -> Result<Option<u32>> {
        self.inner.difficulty()
    }

    fn initialize(&self, genesis: &Hash, encoded: &[u8], difficulty: u32) -> Result<bool> {
        self.inner.initialize(genesis, encoded, difficulty)
    }

    fn commit(&self, expected_tip: &Hash, hash: &Hash, encoded: &[u8]) -> Result<CommitOutcome> {
        self.inner.commit(expected_tip, hash, encoded)
    }

    fn block_count(&self) -> Result<usize> {
        self.inner.block_count()
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}
