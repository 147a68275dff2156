//! Zero-knowledge HMAC-SHA256 proof construction for the auth handshake.
//!
//! The session key never transits the network; only a proof derived from it
//! does. See the signaling wire format for how the proof is carried.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::connection::Role;
use crate::error::SignalingError;

type HmacSha256 = Hmac<Sha256>;

/// Builds the canonical challenge payload the proof is computed over.
fn canonical_payload(public_token: &str, role: Role, nonce: &str, timestamp: i64) -> String {
    format!("openpull-auth|v1|{public_token}|{role}|{nonce}|{timestamp}")
}

/// Computes `proof = HMAC-SHA256(key_bytes, payload_utf8)` as lowercase hex,
/// where `key_bytes = hex_decode(key)`.
pub fn compute_proof(
    key: &str,
    public_token: &str,
    role: Role,
    nonce: &str,
    timestamp: i64,
) -> Result<String, SignalingError> {
    let key_bytes = hex::decode(key)?;
    let payload = canonical_payload(public_token, role, nonce, timestamp);

    let mut mac = HmacSha256::new_from_slice(&key_bytes)
        .expect("HMAC accepts keys of any length");
    mac.update(payload.as_bytes());
    let digest = mac.finalize().into_bytes();

    Ok(hex::encode(digest))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Byte-exact reproduction required: any reimplementation of the proof
    /// must match this output.
    #[test]
    fn proof_matches_reference_vector() {
        let proof = compute_proof("00", "XYZ", Role::Appender, "N", 1700000000).unwrap();

        let payload = "openpull-auth|v1|XYZ|appender|N|1700000000";
        let mut mac = HmacSha256::new_from_slice(&[0x00]).unwrap();
        mac.update(payload.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());

        assert_eq!(proof, expected);
    }

    #[test]
    fn rejects_non_hex_key() {
        let err = compute_proof("not-hex", "XYZ", Role::Reader, "N", 0).unwrap_err();
        assert!(matches!(err, SignalingError::InvalidKey(_)));
    }

    #[test]
    fn differing_roles_yield_differing_proofs() {
        let a = compute_proof("00ff", "tok", Role::Appender, "N", 1).unwrap();
        let b = compute_proof("00ff", "tok", Role::Reader, "N", 1).unwrap();
        assert_ne!(a, b);
    }
}
