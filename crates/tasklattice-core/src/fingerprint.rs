//! Deterministic fingerprints for plans, substitution maps, and lattice
//! variants.
//!
//! Canonical form is compact JSON with sorted object keys (serde_json's
//! default map is ordered). Run-directory fingerprints truncate SHA-256 to
//! 12 hex chars; variant identifiers keep 128 bits (32 hex chars).

use sha2::{Digest, Sha256};

use crate::placeholder::model::{ParamName, ValueLiteral};
use crate::SubstitutionMap;

/// Hex digits kept for plan/subs fingerprints (directory names).
pub const SHORT_FINGERPRINT_LEN: usize = 12;

/// Hex digits of a lattice variant identifier (128 bits).
pub const VARIANT_ID_LEN: usize = 32;

pub fn sha256_hex(data: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(data);
    hex::encode(h.finalize())
}

/// Short stable hash of a canonical JSON payload.
pub fn stable_hash_short(payload: &serde_json::Value) -> String {
    let blob = serde_json::to_string(payload).expect("canonical payload must serialize");
    let mut hex = sha256_hex(blob.as_bytes());
    hex.truncate(SHORT_FINGERPRINT_LEN);
    hex
}

/// Canonical encoding of one literal. Values are tagged by type so `1`,
/// `1.0`, `true`, and `"1"` can never collide, and non-finite floats keep a
/// stable spelling instead of degrading to JSON null.
pub fn canonical_value(value: &ValueLiteral) -> serde_json::Value {
    match value {
        ValueLiteral::Str(s) => serde_json::json!(["s", s]),
        ValueLiteral::Int(i) => serde_json::json!(["i", i]),
        ValueLiteral::Bool(b) => serde_json::json!(["b", b]),
        ValueLiteral::Float(f) => {
            if f.is_finite() {
                serde_json::json!(["f", f])
            } else {
                serde_json::json!(["f", f.to_string()])
            }
        }
    }
}

/// Canonical encoding of a substitution map: `(name, value)` pairs sorted
/// by name.
pub fn canonical_subs(subs: &SubstitutionMap) -> serde_json::Value {
    let mut pairs: Vec<(&ParamName, &ValueLiteral)> = subs.iter().collect();
    pairs.sort_by(|a, b| a.0.as_str().cmp(b.0.as_str()));
    serde_json::Value::Array(
        pairs
            .into_iter()
            .map(|(k, v)| serde_json::json!([k.as_str(), canonical_value(v)]))
            .collect(),
    )
}

/// Order-independent, stable fingerprint of a substitution map.
pub fn subs_fingerprint(subs: &SubstitutionMap) -> String {
    stable_hash_short(&canonical_subs(subs))
}

/// 128-bit variant identifier: salt mixed with the canonical map encoding,
/// rendered as fixed-width lowercase hex.
pub fn variant_id(salt: &str, subs: &SubstitutionMap) -> String {
    let canonical =
        serde_json::to_string(&canonical_subs(subs)).expect("canonical payload must serialize");
    let mut h = Sha256::new();
    h.update(salt.as_bytes());
    h.update([0u8]);
    h.update(canonical.as_bytes());
    hex::encode(&h.finalize()[..VARIANT_ID_LEN / 2])
}
