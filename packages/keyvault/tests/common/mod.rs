//! Shared fixtures for integration tests

#![allow(dead_code)]

use cryypt_keyvault::crypto::RsaKeyMaterial;
use cryypt_keyvault::{KeyVault, KeyVaultConfig, MemoryStore};
use once_cell::sync::Lazy;
use std::sync::Arc;

pub const VAULT_URL: &str = "https://vault.test";

/// One internal keypair for the whole test binary
pub static INTERNAL_KEYPAIR: Lazy<Arc<RsaKeyMaterial>> =
    Lazy::new(|| Arc::new(RsaKeyMaterial::generate(2048).expect("internal keypair")));

pub fn config() -> KeyVaultConfig {
    KeyVaultConfig {
        vault_url: VAULT_URL.to_string(),
        purge_interval_seconds: 0,
        ..KeyVaultConfig::default()
    }
}

/// Fresh in-memory vault sharing the test keypair
pub fn vault() -> KeyVault {
    vault_with(config())
}

pub fn vault_with(config: KeyVaultConfig) -> KeyVault {
    cryypt_keyvault::logging::init_test();
    let store = Arc::new(MemoryStore::new(config.retention(), config.max_page_size));
    KeyVault::with_keypair(config, store, INTERNAL_KEYPAIR.clone()).expect("vault")
}
