// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HMAC-SHA256 signatures over lock records.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Signs and verifies lock records with the shared secret.
///
/// The signed message is `holder:pid:timestamp:requestId:secret`, keyed by
/// the same secret. Instances must share the secret to honor each other's
/// records.
#[derive(Clone)]
pub struct LockSigner {
    mac: HmacSha256,
    secret: String,
}

impl LockSigner {
    pub fn new(secret: &str) -> Self {
        let mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
            Ok(mac) => mac,
            Err(_) => unreachable!("HMAC accepts keys of any length"),
        };
        Self {
            mac,
            secret: secret.to_string(),
        }
    }

    /// Hex-encoded signature.
    pub fn sign(&self, holder: &str, pid: u32, timestamp: i64, request_id: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(self.message(holder, pid, timestamp, request_id).as_bytes());
        alloy::hex::encode(mac.finalize().into_bytes())
    }

    /// Constant-time check of a hex signature.
    pub fn verify(
        &self,
        holder: &str,
        pid: u32,
        timestamp: i64,
        request_id: &str,
        signature: &str,
    ) -> bool {
        let Ok(expected) = alloy::hex::decode(signature) else {
            return false;
        };
        let mut mac = self.mac.clone();
        mac.update(self.message(holder, pid, timestamp, request_id).as_bytes());
        mac.verify_slice(&expected).is_ok()
    }

    fn message(&self, holder: &str, pid: u32, timestamp: i64, request_id: &str) -> String {
        format!("{holder}:{pid}:{timestamp}:{request_id}:{}", self.secret)
    }
}

impl std::fmt::Debug for LockSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockSigner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_round_trips() {
        let signer = LockSigner::new("shared-secret");
        let sig = signer.sign("worker-a", 42, 1_700_000_000_000, "req-1");
        assert_eq!(sig.len(), 64);
        assert!(signer.verify("worker-a", 42, 1_700_000_000_000, "req-1", &sig));
    }

    #[test]
    fn any_field_change_invalidates() {
        let signer = LockSigner::new("shared-secret");
        let sig = signer.sign("worker-a", 42, 1_700_000_000_000, "req-1");
        assert!(!signer.verify("worker-b", 42, 1_700_000_000_000, "req-1", &sig));
        assert!(!signer.verify("worker-a", 43, 1_700_000_000_000, "req-1", &sig));
        assert!(!signer.verify("worker-a", 42, 1_700_000_000_001, "req-1", &sig));
        assert!(!signer.verify("worker-a", 42, 1_700_000_000_000, "req-2", &sig));
    }

    #[test]
    fn different_secret_rejects() {
        let sig = LockSigner::new("one").sign("worker-a", 1, 1, "req");
        assert!(!LockSigner::new("two").verify("worker-a", 1, 1, "req", &sig));
    }

    #[test]
    fn malformed_signature_rejects() {
        let signer = LockSigner::new("secret");
        assert!(!signer.verify("worker-a", 1, 1, "req", "not-hex"));
        assert!(!signer.verify("worker-a", 1, 1, "req", ""));
    }
}
