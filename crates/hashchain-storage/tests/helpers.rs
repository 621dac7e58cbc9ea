#![allow(dead_code)]

use std::fs;
use std::sync::Arc;

use hashchain_core::{Chain, ChainConfig, PowConfig};
use hashchain_storage::SledStore;
use tempfile::{tempdir, TempDir};

pub const TEST_DIFFICULTY: u32 = 8;

pub fn test_config() -> ChainConfig {
    ChainConfig::new(PowConfig::new(TEST_DIFFICULTY))
}

pub fn create_temp_dir() -> (TempDir, std::path::PathBuf) {
    // Create a temporary directory for the sled database
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (temp_dir, db_path)
}

pub fn remove_temp_dir(temp_dir: TempDir) {
    let db_path = temp_dir.path().to_path_buf();
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    // Verify the directory is removed
    assert!(!db_path.exists(), "Database directory should be removed");
}

pub fn create_temp_chain() -> (TempDir, Chain<SledStore>) {
    let (temp_dir, db_path) = create_temp_dir();
    let store = Arc::new(SledStore::open(&db_path).expect("Failed to open SledStore"));
    let chain = Chain::open(store, test_config()).expect("Failed to open chain");
    (temp_dir, chain)
}

pub fn reopen_chain(db_path: &std::path::Path) -> Chain<SledStore> {
    let store = Arc::new(SledStore::open(db_path).expect("Failed to reopen SledStore"));
    Chain::open(store, test_config()).expect("Failed to reopen chain")
}

pub fn teardown_chain(temp_dir: TempDir, chain: Chain<SledStore>) {
    chain.store().clear().expect("Failed to clear the store");
    chain.close().expect("Failed to close the chain");
    remove_temp_dir(temp_dir);
}
