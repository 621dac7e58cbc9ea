use crate::{constants::MINING_BATCH_SIZE, pow::meets_difficulty, Hash, Preimage};
use rayon::prelude::*;
use tracing::debug;

/// Searches nonces in parallel until a digest has at least `difficulty` leading zero bits.
///
/// The range is walked in batches of `MINING_BATCH_SIZE`; inside a batch rayon's
/// `find_first` keeps the lowest hit, so the result is the same `(nonce, hash)`
/// pair the sequential search returns.
pub fn mine_parallel(preimage: &Preimage, difficulty: u32, max_nonce: u64) -> Option<(u64, Hash)> {
    let mut start = 0u64;
    loop {
        let end = start.saturating_add(MINING_BATCH_SIZE - 1).min(max_nonce);

        let found = (start..=end)
            .into_par_iter()
            .map(|nonce| (nonce, preimage.digest(nonce)))
            .find_first(|(_, hash)| meets_difficulty(hash, difficulty));

        if found.is_some() {
            return found;
        }
        debug!("no nonce in {start}..={end} meets difficulty {difficulty}");

        if end == max_nonce {
            return None;
        }
        start = end + 1;
    }
}
