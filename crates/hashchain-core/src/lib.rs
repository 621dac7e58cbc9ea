pub mod chain;
pub mod constants;
pub mod error;
pub mod mine;

#[cfg(test)]
mod test_utils;

pub use chain::{BlockStore, Chain, ChainConfig, ChainIter, CommitOutcome};
pub use error::{ChainError, IntegrityViolation, Result};
pub use pow::PowConfig;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::info;

pub type Hash = [u8; 32];

/// Seconds since the Unix epoch.
pub fn now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_secs() as i64
}

/// Hashing state over every block field except the nonce.
///
/// The prefix `prev_hash ‖ payload ‖ timestamp ‖ difficulty` is absorbed once;
/// each attempt clones it and appends the nonce, so mining only pays for the
/// final 8 bytes per candidate. Integers are little-endian.
#[derive(Clone)]
pub struct Preimage {
    prefix: Sha256,
}

impl Preimage {
    pub fn new(prev_hash: Option<&Hash>, payload: &[u8], timestamp: i64, difficulty: u32) -> Self {
        let mut prefix = Sha256::new();
        if let Some(prev) = prev_hash {
            prefix.update(prev);
        }
        prefix.update(payload);
        prefix.update(timestamp.to_le_bytes());
        prefix.update(difficulty.to_le_bytes());
        Self { prefix }
    }

    pub fn digest(&self, nonce: u64) -> Hash {
        let mut hasher = self.prefix.clone();
        hasher.update(nonce.to_le_bytes());
        let digest = hasher.finalize();
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..]);
        out
    }
}

/// One chain entry. Only produced by mining (`Block::create`) or by decoding
/// stored bytes, and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    timestamp: i64,
    payload: Vec<u8>,
    prev_hash: Option<Hash>,
    hash: Hash,
    nonce: u64,
}

impl Block {
    /// Stamps the current time and mines the block at `pow.difficulty`.
    pub fn create(payload: impl Into<Vec<u8>>, prev_hash: Option<Hash>, pow: &PowConfig) -> Result<Self> {
        Self::create_at(payload, prev_hash, now(), pow)
    }

    /// Like [`Block::create`] with a caller-chosen timestamp.
    pub fn create_at(
        payload: impl Into<Vec<u8>>,
        prev_hash: Option<Hash>,
        timestamp: i64,
        pow: &PowConfig,
    ) -> Result<Self> {
        pow.validate()?;
        let payload = payload.into();
        let preimage = Preimage::new(prev_hash.as_ref(), &payload, timestamp, pow.difficulty);
        let (nonce, hash) = pow::mine(&preimage, pow)?;

        info!(
            "Mined block {} with nonce {} at difficulty {}",
            hex::encode(hash),
            nonce,
            pow.difficulty
        );

        Ok(Self {
            timestamp,
            payload,
            prev_hash,
            hash,
            nonce,
        })
    }

    pub fn genesis(pow: &PowConfig) -> Result<Self> {
        Self::create(constants::GENESIS_PAYLOAD, None, pow)
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn prev_hash(&self) -> Option<&Hash> {
        self.prev_hash.as_ref()
    }

    pub fn hash(&self) -> Hash {
        self.hash
    }

    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    pub fn is_genesis(&self) -> bool {
        self.prev_hash.is_none()
    }

    /// Recomputes the digest from the block's fields at the stored nonce.
    pub fn compute_hash(&self, difficulty: u32) -> Hash {
        Preimage::new(self.prev_hash.as_ref(), &self.payload, self.timestamp, difficulty).digest(self.nonce)
    }

    /// Checks hash integrity and the proof-of-work predicate without searching.
    pub fn verify(&self, difficulty: u32) -> std::result::Result<(), IntegrityViolation> {
        let computed = self.compute_hash(difficulty);
        if computed != self.hash {
            return Err(IntegrityViolation::HashMismatch {
                stored: hex::encode(self.hash),
                computed: hex::encode(computed),
            });
        }
        if !pow::meets_difficulty(&self.hash, difficulty) {
            return Err(IntegrityViolation::InsufficientWork {
                hash: hex::encode(self.hash),
                difficulty,
            });
        }
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).map_err(ChainError::Encode)
    }

    pub fn decode(bytes: &[u8]) -> std::result::Result<Self, bincode::Error> {
        bincode::deserialize(bytes)
    }
}

pub mod pow {
    use super::{constants, ChainError, Hash, Preimage, Result};

    /// Proof-of-work parameters. `difficulty` is fixed for the lifetime of a chain.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub struct PowConfig {
        pub difficulty: u32,
        /// Highest nonce tried before giving up.
        pub max_nonce: u64,
        /// Search on the rayon pool instead of the calling thread.
        pub parallel: bool,
    }

    impl Default for PowConfig {
        fn default() -> Self {
            Self::new(constants::POW_TARGET_DIFFICULTY)
        }
    }

    impl PowConfig {
        pub fn new(difficulty: u32) -> Self {
            Self {
                difficulty,
                max_nonce: u64::MAX,
                parallel: false,
            }
        }

        pub fn with_max_nonce(mut self, max_nonce: u64) -> Self {
            self.max_nonce = max_nonce;
            self
        }

        pub fn with_parallel(mut self, parallel: bool) -> Self {
            self.parallel = parallel;
            self
        }

        pub fn validate(&self) -> Result<()> {
            if self.difficulty > constants::MAX_DIFFICULTY {
                return Err(ChainError::InvalidDifficulty(self.difficulty));
            }
            Ok(())
        }
    }

    /// Finds the lowest nonce in `0..=max_nonce` whose digest meets the difficulty.
    pub fn mine(preimage: &Preimage, config: &PowConfig) -> Result<(u64, Hash)> {
        let found = if config.parallel {
            crate::mine::mine_parallel(preimage, config.difficulty, config.max_nonce)
        } else {
            mine_sequential(preimage, config.difficulty, config.max_nonce)
        };
        found.ok_or(ChainError::MiningExhausted {
            difficulty: config.difficulty,
            max_nonce: config.max_nonce,
        })
    }

    /// Mine by incrementing the nonce until the number of leading zero bits
    /// in the digest >= `difficulty`.
    pub fn mine_sequential(preimage: &Preimage, difficulty: u32, max_nonce: u64) -> Option<(u64, Hash)> {
        (0..=max_nonce)
            .map(|nonce| (nonce, preimage.digest(nonce)))
            .find(|(_, hash)| meets_difficulty(hash, difficulty))
    }

    /// `hash` read as a big-endian integer is below `2^(256 - difficulty)`.
    pub fn meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
        count_leading_zero_bits(hash) >= difficulty
    }

    pub fn count_leading_zero_bits(hash: &Hash) -> u32 {
        let mut total = 0u32;
        for b in hash {
            if *b == 0 {
                total += 8;
            } else {
                total += b.leading_zeros();
                break;
            }
        }
        total
    }
}
