//! Chain error types.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ChainError>;

/// Errors surfaced by chain operations (`open`, `append`, iteration, verification).
#[derive(Debug, Error)]
pub enum ChainError {
    /// The backing key/value store failed to read or write.
    #[error("store i/o failure: {0}")]
    Store(#[from] anyhow::Error),

    /// The bounded nonce search finished without meeting the target.
    #[error("mining exhausted: no nonce in 0..={max_nonce} meets difficulty {difficulty}")]
    MiningExhausted { difficulty: u32, max_nonce: u64 },

    /// A stored block could not be reconstructed from its bytes.
    #[error("block {hash} could not be decoded: {source}")]
    Decode {
        hash: String,
        #[source]
        source: bincode::Error,
    },

    #[error("block could not be encoded: {0}")]
    Encode(#[source] bincode::Error),

    /// The cursor points at a hash with no stored block.
    #[error("block {0} not found in store")]
    MissingBlock(String),

    /// Stored data decodes but no longer satisfies the chain invariants.
    #[error("chain integrity violation: {0}")]
    Integrity(#[from] IntegrityViolation),

    #[error("difficulty {0} out of range (0..=256)")]
    InvalidDifficulty(u32),

    #[error("store was created with difficulty {stored}, configured difficulty is {configured}")]
    DifficultyMismatch { stored: u32, configured: u32 },

    /// The reserved tip key is absent from a store that should hold a chain.
    #[error("store has no tip")]
    MissingTip,

    #[error("stored tip is {0} bytes, expected 32")]
    CorruptTip(usize),

    /// Another writer moved the tip between reading it and committing.
    #[error("tip moved during append (expected {expected}, found {found})")]
    TipConflict { expected: String, found: String },
}

/// Tamper or corruption conditions found by block and chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntegrityViolation {
    #[error("block {stored} recomputes to {computed}")]
    HashMismatch { stored: String, computed: String },

    #[error("block {hash} has fewer than {difficulty} leading zero bits")]
    InsufficientWork { hash: String, difficulty: u32 },

    #[error("block {hash} is stored under key {key}")]
    KeyMismatch { key: String, hash: String },

    #[error("block {hash} references missing predecessor {prev_hash}")]
    DanglingPrevHash { hash: String, prev_hash: String },

    /// The walk from tip reached a different number of blocks than the store holds.
    #[error("store holds {stored} blocks but {walked} are reachable from the tip")]
    CountMismatch { stored: usize, walked: usize },
}
