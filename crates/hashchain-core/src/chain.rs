use crate::{
    constants::HASH_SIZE, Block, ChainError, Hash, IntegrityViolation, PowConfig, Result,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Outcome of a compare-and-swap commit against the stored tip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// Nothing was written; the stored tip was not the expected one.
    TipMoved(Option<Vec<u8>>),
}

/// Key/value backend the chain persists into.
/// This lives in the core crate so the storage crate can depend on it.
pub trait BlockStore: Send + Sync {
    /// Serialized block stored under `hash`.
    fn get(&self, hash: &Hash) -> anyhow::Result<Option<Vec<u8>>>;

    /// Raw value of the reserved tip key, `None` if the chain was never initialised.
    fn tip(&self) -> anyhow::Result<Option<Vec<u8>>>;

    /// Difficulty recorded when the chain was initialised.
    fn difficulty(&self) -> anyhow::Result<Option<u32>>;

    /// Atomically stores the genesis block, the tip and the difficulty, unless a
    /// tip already exists. Returns `false` when nothing was written.
    fn initialize(&self, genesis: &Hash, encoded: &[u8], difficulty: u32) -> anyhow::Result<bool>;

    /// Atomically stores `hash -> encoded` and moves the tip to `hash`, provided
    /// the stored tip still equals `expected_tip`.
    fn commit(&self, expected_tip: &Hash, hash: &Hash, encoded: &[u8]) -> anyhow::Result<CommitOutcome>;

    /// Number of blocks stored, reserved keys excluded.
    fn block_count(&self) -> anyhow::Result<usize>;

    fn flush(&self) -> anyhow::Result<()>;
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChainConfig {
    pub pow: PowConfig,
}

impl ChainConfig {
    pub fn new(pow: PowConfig) -> Self {
        Self { pow }
    }

    pub fn difficulty(&self) -> u32 {
        self.pow.difficulty
    }
}

/// Append-only hash-chain over a `BlockStore`, tracking the current tip.
pub struct Chain<S: BlockStore> {
    store: Arc<S>,
    config: ChainConfig,
    tip: Hash,
    /// Chain length known for a given tip hash.
    len_cache: Option<(Hash, usize)>,
}

impl<S: BlockStore> Chain<S> {
    /// Loads the tip of an existing chain, or seeds a fresh store with a genesis block.
    /// Reopening an initialised store never writes a second genesis.
    pub fn open(store: Arc<S>, config: ChainConfig) -> Result<Self> {
        config.pow.validate()?;

        let mut len_cache = None;
        let tip = match read_tip(store.as_ref())? {
            Some(tip) => {
                check_difficulty(store.as_ref(), &config)?;
                info!("loaded chain with tip {}", hex::encode(tip));
                tip
            }
            None => {
                let genesis = Block::genesis(&config.pow)?;
                let encoded = genesis.encode()?;
                if store.initialize(&genesis.hash(), &encoded, config.difficulty())? {
                    info!("initialised chain with genesis {}", hex::encode(genesis.hash()));
                    len_cache = Some((genesis.hash(), 1));
                    genesis.hash()
                } else {
                    // Initialised by someone else between our read and write.
                    check_difficulty(store.as_ref(), &config)?;
                    read_tip(store.as_ref())?.ok_or(ChainError::MissingTip)?
                }
            }
        };

        Ok(Self {
            store,
            config,
            tip,
            len_cache,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    pub fn tip(&self) -> Hash {
        self.tip
    }

    /// Mines a block carrying `payload` on top of the stored tip and commits it.
    ///
    /// The block and the new tip are written in one transaction; on any error
    /// (mining exhausted, store failure, tip conflict) nothing is written and
    /// the in-memory tip is left alone.
    pub fn append(&mut self, payload: impl Into<Vec<u8>>) -> Result<Block> {
        let prev = read_tip(self.store.as_ref())?.ok_or(ChainError::MissingTip)?;

        let block = Block::create(payload, Some(prev), &self.config.pow)?;
        let encoded = block.encode()?;

        match self.store.commit(&prev, &block.hash(), &encoded)? {
            CommitOutcome::Committed => {
                self.tip = block.hash();
                self.len_cache = match self.len_cache {
                    Some((cached, len)) if cached == prev => Some((block.hash(), len + 1)),
                    other => other,
                };
                info!(
                    "appended block {} ({} payload bytes) after {}",
                    hex::encode(block.hash()),
                    block.payload().len(),
                    hex::encode(prev)
                );
                Ok(block)
            }
            CommitOutcome::TipMoved(found) => {
                let found = found.map(hex::encode).unwrap_or_default();
                warn!("tip moved from {} to {found} while mining", hex::encode(prev));
                Err(ChainError::TipConflict {
                    expected: hex::encode(prev),
                    found,
                })
            }
        }
    }

    /// Cursor walking from the current tip back to genesis.
    pub fn iter(&self) -> ChainIter<S> {
        ChainIter::new(Arc::clone(&self.store), self.tip)
    }

    pub fn get_block(&self, hash: &Hash) -> Result<Option<Block>> {
        load_block(self.store.as_ref(), hash)
    }

    /// The newest `limit` blocks, tip first.
    pub fn blocks(&self, limit: usize) -> Result<Vec<Block>> {
        self.iter().take(limit).collect()
    }

    /// Number of blocks reachable from the tip, genesis included.
    pub fn len(&self) -> Result<usize> {
        self.iter().try_fold(0usize, |n, block| block.map(|_| n + 1))
    }

    /// Blocks below the tip; genesis is height 0. Only walks the chain when the
    /// tip moved without going through this handle.
    pub fn height(&mut self) -> Result<usize> {
        let len = match self.len_cache {
            Some((tip, len)) if tip == self.tip => len,
            _ => {
                let len = self.len()?;
                self.len_cache = Some((self.tip, len));
                len
            }
        };
        Ok(len.saturating_sub(1))
    }

    /// Walks the whole chain from the stored tip and checks every invariant: each
    /// entry decodes, is stored under its own hash, recomputes to that hash, meets
    /// the difficulty, and links to a stored predecessor; the walk ends at a
    /// genesis block and covers every stored block. Returns the number of
    /// verified blocks.
    pub fn verify(&self) -> Result<usize> {
        let difficulty = self.config.difficulty();
        let stored = self.store.block_count()?;
        let mut walked = 0usize;
        let mut current = read_tip(self.store.as_ref())?.ok_or(ChainError::MissingTip)?;

        loop {
            let block = load_block(self.store.as_ref(), &current)?
                .ok_or_else(|| ChainError::MissingBlock(hex::encode(current)))?;
            walked += 1;

            let violation = if block.hash() != current {
                Some(IntegrityViolation::KeyMismatch {
                    key: hex::encode(current),
                    hash: hex::encode(block.hash()),
                })
            } else if walked > stored {
                Some(IntegrityViolation::CountMismatch { stored, walked })
            } else {
                block.verify(difficulty).err()
            };
            if let Some(violation) = violation {
                warn!("verification failed: {violation}");
                return Err(violation.into());
            }

            let Some(prev) = block.prev_hash().copied() else {
                break;
            };
            if self.store.get(&prev)?.is_none() {
                let violation = IntegrityViolation::DanglingPrevHash {
                    hash: hex::encode(current),
                    prev_hash: hex::encode(prev),
                };
                warn!("verification failed: {violation}");
                return Err(violation.into());
            }
            current = prev;
        }

        if walked != stored {
            let violation = IntegrityViolation::CountMismatch { stored, walked };
            warn!("verification failed: {violation}");
            return Err(violation.into());
        }
        info!("verified {walked} blocks");
        Ok(walked)
    }

    /// Flushes the backend. Dropping the chain afterwards releases the store.
    pub fn close(self) -> Result<()> {
        self.store.flush()?;
        Ok(())
    }
}

/// Lazy tip-to-genesis traversal.
///
/// Yields each block and then moves to its predecessor. After the genesis block
/// (empty `prev_hash`) or after yielding an error the cursor is exhausted and
/// keeps returning `None`; a new `Chain::iter` call is needed to walk again.
/// An entry stored under a key other than its own hash is reported as a
/// `KeyMismatch` and ends the walk, so a corrupted link cannot loop forever.
pub struct ChainIter<S: BlockStore> {
    store: Arc<S>,
    current: Option<Hash>,
}

impl<S: BlockStore> ChainIter<S> {
    pub fn new(store: Arc<S>, start: Hash) -> Self {
        Self {
            store,
            current: Some(start),
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.current.is_none()
    }
}

impl<S: BlockStore> Iterator for ChainIter<S> {
    type Item = Result<Block>;

    fn next(&mut self) -> Option<Self::Item> {
        let hash = self.current.take()?;
        debug!("reading block {}", hex::encode(hash));

        let item = load_block(self.store.as_ref(), &hash).and_then(|block| {
            let block = block.ok_or_else(|| ChainError::MissingBlock(hex::encode(hash)))?;
            if block.hash() != hash {
                return Err(IntegrityViolation::KeyMismatch {
                    key: hex::encode(hash),
                    hash: hex::encode(block.hash()),
                }
                .into());
            }
            Ok(block)
        });
        if let Ok(block) = &item {
            self.current = block.prev_hash().copied();
        }
        Some(item)
    }
}

fn load_block<S: BlockStore + ?Sized>(store: &S, hash: &Hash) -> Result<Option<Block>> {
    match store.get(hash)? {
        Some(bytes) => Block::decode(&bytes)
            .map(Some)
            .map_err(|source| ChainError::Decode {
                hash: hex::encode(hash),
                source,
            }),
        None => Ok(None),
    }
}

fn read_tip<S: BlockStore + ?Sized>(store: &S) -> Result<Option<Hash>> {
    match store.tip()? {
        Some(bytes) => {
            if bytes.len() != HASH_SIZE {
                return Err(ChainError::CorruptTip(bytes.len()));
            }
            let mut tip = [0u8; HASH_SIZE];
            tip.copy_from_slice(&bytes);
            Ok(Some(tip))
        }
        None => Ok(None),
    }
}

fn check_difficulty<S: BlockStore + ?Sized>(store: &S, config: &ChainConfig) -> Result<()> {
    match store.difficulty()? {
        Some(stored) if stored != config.difficulty() => Err(ChainError::DifficultyMismatch {
            stored,
            configured: config.difficulty(),
        }),
        _ => Ok(()),
    }
}
