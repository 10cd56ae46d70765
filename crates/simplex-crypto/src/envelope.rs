//! The canonical signature decorator: `{ @type, signer, sig_data, signature }`
//! per §4.B/§6 of the design — `sig_data` is an 8-byte big-endian Unix
//! timestamp followed by the canonical-JSON payload, signed with Ed25519.

use serde::{Deserialize, Serialize};
use simplex_core::VerKey;
use thiserror::Error;

use crate::keypair::{verify_bytes, KeyPair};

const ENVELOPE_TYPE: &str = "ed25519Sha512_single";
const TIMESTAMP_LEN: usize = 8;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignatureEnvelope {
    #[serde(rename = "@type")]
    pub type_: String,
    pub signer: VerKey,
    #[serde(with = "base64_bytes")]
    pub sig_data: Vec<u8>,
    #[serde(with = "base64_bytes")]
    pub signature: Vec<u8>,
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("signer {signer} does not match expected verkey {expected}")]
    SignerMismatch { signer: String, expected: String },
    #[error("Ed25519 signature does not verify")]
    BadSignature,
    #[error("sig_data shorter than the {TIMESTAMP_LEN}-byte timestamp prefix")]
    Truncated,
}

/// The payload and metadata recovered from a verified envelope.
pub struct VerifiedPayload {
    pub payload: Vec<u8>,
    pub timestamp: i64,
    /// `|now - timestamp|`, left for the caller to judge against
    /// `MAX_SKEW_SEC` — skew alone is never fatal here (§4.B).
    pub skew_sec: i64,
}

/// Sign `payload` (already canonical JSON bytes) as `signer` at `now`.
pub fn sign(payload: &[u8], now: i64, signer: &KeyPair) -> SignatureEnvelope {
    let mut sig_data = Vec::with_capacity(TIMESTAMP_LEN + payload.len());
    sig_data.extend_from_slice(&now.to_be_bytes());
    sig_data.extend_from_slice(payload);
    let signature = signer.sign_bytes(&sig_data).to_vec();
    SignatureEnvelope {
        type_: ENVELOPE_TYPE.to_string(),
        signer: signer.verkey(),
        sig_data,
        signature,
    }
}

/// Verify `envelope` was produced by `expected_signer` and return the
/// recovered payload plus timestamp skew against `now`.
pub fn verify(
    envelope: &SignatureEnvelope,
    expected_signer: &VerKey,
    now: i64,
) -> Result<VerifiedPayload, VerifyError> {
    if &envelope.signer != expected_signer {
        return Err(VerifyError::SignerMismatch {
            signer: envelope.signer.to_hex(),
            expected: expected_signer.to_hex(),
        });
    }
    if envelope.sig_data.len() < TIMESTAMP_LEN {
        return Err(VerifyError::Truncated);
    }
    let sig_bytes: [u8; 64] = envelope
        .signature
        .as_slice()
        .try_into()
        .map_err(|_| VerifyError::BadSignature)?;
    if !verify_bytes(&envelope.signer, &envelope.sig_data, &sig_bytes) {
        return Err(VerifyError::BadSignature);
    }
    let mut ts_bytes = [0u8; 8];
    ts_bytes.copy_from_slice(&envelope.sig_data[..TIMESTAMP_LEN]);
    let timestamp = i64::from_be_bytes(ts_bytes);
    let payload = envelope.sig_data[TIMESTAMP_LEN..].to_vec();
    Ok(VerifiedPayload {
        payload,
        timestamp,
        skew_sec: (now - timestamp).abs(),
    })
}
