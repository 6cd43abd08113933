//! Password -> 32-byte key derivation. Driver-layer concern (spec §1
//! Non-goals: "Key derivation... password hashing is a caller
//! concern"), kept out of `codec` so the core never depends on a
//! password at all — only on a 32-byte key it's handed.
//!
//! Uses Argon2id with a store-fixed salt derived from the store's
//! `dbpath`, so the same password always derives the same key for a
//! given store without persisting a separate salt file.

use argon2::Argon2;

use crate::error::{Result, StoreError};

/// Derive a 32-byte AES-256-GCM key from a password and a salt. The
/// salt should be stable for a given store (e.g. its dbpath) so the
/// same password re-derives the same key across runs.
pub fn derive_key(password: &str, salt: &[u8]) -> Result<[u8; 32]> {
    let argon2 = Argon2::default();
    let mut key = [0u8; 32];
    argon2
        .hash_password_into(password.as_bytes(), salt, &mut key)
        .map_err(|e| StoreError::Crypto(format!("key derivation failed: {e}")))?;
    Ok(key)
}

/// Salt bytes derived from the store path itself via SHA3-256, so no
/// separate salt file needs to live alongside the store.
pub fn salt_for_path(dbpath: &std::path::Path) -> Vec<u8> {
    crate::codec::hash_bytes_256(dbpath.to_string_lossy().as_bytes()).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_password_and_salt_derive_same_key() {
        let salt = b"fixed-salt-bytes-0123456789abcd";
        let a = derive_key("hunter2", salt).unwrap();
        let b = derive_key("hunter2", salt).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_passwords_derive_different_keys() {
        let salt = b"fixed-salt-bytes-0123456789abcd";
        let a = derive_key("hunter2", salt).unwrap();
        let b = derive_key("hunter3", salt).unwrap();
        assert_ne!(a, b);
    }
}
