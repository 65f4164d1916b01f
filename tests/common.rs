//! Common test utilities.
//!
//! Shared helpers for integration tests. Import with `mod common;`.

#![allow(dead_code)]

use notarius::ledger::{Party, StateRef, TxId};
use std::io::Write;
use tempfile::NamedTempFile;

/// A transaction id with a recognizable byte pattern.
pub fn tx(byte: u8) -> TxId {
    TxId([byte; 32])
}

/// `count` state refs produced by the transaction `producer`.
pub fn refs_of(producer: TxId, count: u32) -> Vec<StateRef> {
    (0..count).map(|i| StateRef::new(producer, i)).collect()
}

/// A requesting party without key material.
pub fn alice() -> Party {
    Party::named("alice")
}

/// Create a minimal valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    let config_content = r#"
[identity]
name = "notary-test"
signing_key_hex = "0101010101010101010101010101010101010101010101010101010101010101"
"#;

    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(config_content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Create a configuration file from the given TOML body.
pub fn create_config(body: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(body.as_bytes())
        .expect("Failed to write config");
    file
}
