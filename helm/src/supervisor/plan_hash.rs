//! Canonical plan hashing for loop detection.
//!
//! Two consecutive runs producing the same hash means the strategist is
//! spinning. The hash must be stable against non-semantic ordering, so each
//! step is rendered with its fields in sorted key order before hashing.

use sha2::{Digest, Sha256};

use crate::agents::Plan;

/// Hash of a plan's semantic content (step names and descriptions, plus
/// tool hints), hex-encoded sha256.
pub fn canonical_plan_hash(plan: &Plan) -> String {
    let mut hasher = Sha256::new();
    for step in &plan.steps {
        // Field keys in sorted order: description, name, tool_hint.
        hasher.update(b"description=");
        hasher.update(step.description.as_bytes());
        hasher.update([0x1e]);
        hasher.update(b"name=");
        hasher.update(step.name.as_bytes());
        hasher.update([0x1e]);
        hasher.update(b"tool_hint=");
        hasher.update(step.tool_hint.as_deref().unwrap_or("").as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(hasher.finalize())
}

/// True when the candidate equals the most recent recorded hash.
pub fn is_repeat(hashes: &[String], candidate: &str) -> bool {
    hashes.last().map(String::as_str) == Some(candidate)
}
