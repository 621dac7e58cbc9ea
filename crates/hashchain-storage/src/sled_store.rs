use anyhow::{anyhow, Context, Result};
use hashchain_core::{BlockStore, CommitOutcome, Hash};
use sled::transaction::TransactionResult;
use sled::{Db, Tree};
use std::path::Path;
use tracing::{debug, info};

/// Bucket holding `hash -> block` plus the reserved keys below.
pub const TREE_BLOCKS: &str = "blocks";
/// Reserved key for the current tip hash.
pub const KEY_TIP: &[u8] = b"l";
/// Reserved key for the difficulty the chain was created with.
pub const KEY_DIFFICULTY: &[u8] = b"d";

#[derive(Clone)]
pub struct SledStore {
  db: Db,
  blocks: Tree,
}

impl SledStore {
  pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
    let path = path.as_ref();
    let db = sled::open(path).with_context(|| format!("opening sled db at {}", path.display()))?;
    let store = Self::from_db(db)?;
    info!("sled store opened at {}", path.display());
    Ok(store)
  }

  /// Store backed by a throwaway database, removed on drop.
  pub fn temporary() -> Result<Self> {
    let db = sled::Config::new().temporary(true).open()?;
    Self::from_db(db)
  }

  fn from_db(db: Db) -> Result<Self> {
    let blocks = db.open_tree(TREE_BLOCKS).context("opening blocks tree")?;
    Ok(Self { db, blocks })
  }

  /// Removes every block and reserved key.
  pub fn clear(&self) -> Result<()> {
    self.blocks.clear()?;
    self.db.flush()?;
    Ok(())
  }

  pub fn close(&self) -> Result<()> {
    self.flush()
  }
}

fn is_reserved(key: &[u8]) -> bool {
  key == KEY_TIP || key == KEY_DIFFICULTY
}

impl BlockStore for SledStore {
  fn get(&self, hash: &Hash) -> Result<Option<Vec<u8>>> {
    Ok(self.blocks.get(hash)?.map(|v| v.to_vec()))
  }

  fn tip(&self) -> Result<Option<Vec<u8>>> {
    Ok(self.blocks.get(KEY_TIP)?.map(|v| v.to_vec()))
  }

  fn difficulty(&self) -> Result<Option<u32>> {
    self
      .blocks
      .get(KEY_DIFFICULTY)?
      .map(|v| -> Result<u32> {
        let arr: [u8; 4] = v
          .as_ref()
          .try_into()
          .map_err(|_| anyhow!("stored difficulty is {} bytes, expected 4", v.len()))?;
        Ok(u32::from_be_bytes(arr))
      })
      .transpose()
  }

  fn initialize(&self, genesis: &Hash, encoded: &[u8], difficulty: u32) -> Result<bool> {
    let res: TransactionResult<bool, sled::Error> = self.blocks.transaction(|tx| {
      if tx.get(KEY_TIP)?.is_some() {
        return Ok(false);
      }
      tx.insert(&genesis[..], encoded)?;
      tx.insert(KEY_TIP, &genesis[..])?;
      tx.insert(KEY_DIFFICULTY, &difficulty.to_be_bytes()[..])?;
      Ok(true)
    });
    let created = res.map_err(|e| anyhow!("initialising chain: {e}"))?;
    self.db.flush()?;
    Ok(created)
  }

  fn commit(&self, expected_tip: &Hash, hash: &Hash, encoded: &[u8]) -> Result<CommitOutcome> {
    let res: TransactionResult<CommitOutcome, sled::Error> = self.blocks.transaction(|tx| {
      let current = tx.get(KEY_TIP)?;
      if current.as_deref() != Some(&expected_tip[..]) {
        return Ok(CommitOutcome::TipMoved(current.map(|v| v.to_vec())));
      }
      tx.insert(&hash[..], encoded)?;
      tx.insert(KEY_TIP, &hash[..])?;
      Ok(CommitOutcome::Committed)
    });
    let outcome = res.map_err(|e| anyhow!("committing block: {e}"))?;

    // update tip on disk
    self.db.flush()?;
    debug!("commit outcome {:?}", outcome);
    Ok(outcome)
  }

  fn block_count(&self) -> Result<usize> {
    let mut count = 0;
    for key in self.blocks.iter().keys() {
      if !is_reserved(&key?) {
        count += 1;
      }
    }
    Ok(count)
  }

  fn flush(&self) -> Result<()> {
    self.db.flush()?;
    Ok(())
  }
}
