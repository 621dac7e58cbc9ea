pub const BYTE: usize = 8;
pub const HASH_SIZE: usize = 32;
pub const HASH_HEX_SIZE: usize = HASH_SIZE * 2;
pub const BLOCKS_PER_BATCH: u32 = 99;
pub const MAX_BLOCKS_PER_REQUEST: u32 = BLOCKS_PER_BATCH * 10;
pub const POW_TARGET_DIFFICULTY: u32 = 20;
pub const MAX_DIFFICULTY: u32 = (HASH_SIZE * BYTE) as u32;
/// Nonces handed to the rayon pool per round of the parallel search.
pub const MINING_BATCH_SIZE: u64 = 1 << 16;
pub const GENESIS_PAYLOAD: &[u8] = b"Genesis Block";
