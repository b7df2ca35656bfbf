// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Facilitator signing key loading.
//!
//! The key arrives either as raw hex in the environment or as a PEM file
//! (SEC1 or PKCS#8) on disk. Both end up as an alloy `PrivateKeySigner`.

use alloy::signers::local::PrivateKeySigner;
use k256::SecretKey;

use super::types::ChainError;
use crate::config::SignerSource;

/// Load the signer described by `source`.
pub fn load_signer(source: &SignerSource) -> Result<PrivateKeySigner, ChainError> {
    match source {
        SignerSource::Hex(hex) => signer_from_hex(hex),
        SignerSource::PemFile(path) => {
            let pem_bytes = std::fs::read(path).map_err(|e| {
                ChainError::InvalidPrivateKey(format!("cannot read {}: {e}", path.display()))
            })?;
            signer_from_pem(&pem_bytes)
        }
    }
}

/// Create a signer from a hex private key, with or without `0x`.
pub fn signer_from_hex(private_key_hex: &str) -> Result<PrivateKeySigner, ChainError> {
    let key_bytes = alloy::hex::decode(private_key_hex.trim())
        .map_err(|e| ChainError::InvalidPrivateKey(e.to_string()))?;

    PrivateKeySigner::from_slice(&key_bytes)
        .map_err(|e| ChainError::InvalidPrivateKey(e.to_string()))
}

/// Parse a private key from PEM format to hex string.
pub fn pem_to_hex(pem_bytes: &[u8]) -> Result<String, ChainError> {
    let pem_str = std::str::from_utf8(pem_bytes)
        .map_err(|e| ChainError::InvalidPrivateKey(format!("Invalid UTF-8: {e}")))?;

    let pem = pem::parse(pem_str)
        .map_err(|e| ChainError::InvalidPrivateKey(format!("Invalid PEM: {e}")))?;

    let secret_key = SecretKey::from_sec1_der(pem.contents())
        .or_else(|_| parse_pkcs8_to_secret_key(pem.contents()))
        .map_err(|e| ChainError::InvalidPrivateKey(format!("Invalid key format: {e}")))?;

    Ok(alloy::hex::encode(secret_key.to_bytes()))
}

fn parse_pkcs8_to_secret_key(der: &[u8]) -> Result<SecretKey, String> {
    use k256::pkcs8::DecodePrivateKey;
    SecretKey::from_pkcs8_der(der).map_err(|e| e.to_string())
}

/// Create a signer from PEM-encoded private key.
pub fn signer_from_pem(pem_bytes: &[u8]) -> Result<PrivateKeySigner, ChainError> {
    let hex_key = pem_to_hex(pem_bytes)?;
    signer_from_hex(&hex_key)
}
