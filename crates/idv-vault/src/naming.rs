//! `id_string` derivation and sanitization
//!
//! Sources, first non-empty wins:
//!   1. explicit id supplied by the caller
//!   2. uploaded file name, minus its extension
//!   3. credential metadata (`name`, `identity_name`, `id` string fields)
//!   4. generated `identity-<unix millis>-<8 hex>`
//!
//! Every candidate goes through [`sanitize_id`]: strip `<>:"/\|?*` and
//! control characters, collapse whitespace runs to `-`, trim `-` and `.`
//! from both ends.

use idv_core::IdentityCandidate;
use std::time::{SystemTime, UNIX_EPOCH};

const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

const METADATA_KEYS: &[&str] = &["name", "identity_name", "id"];

pub fn sanitize_id(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;

    for c in raw.chars() {
        if c.is_whitespace() {
            pending_dash = true;
            continue;
        }
        if c.is_control() || UNSAFE_CHARS.contains(&c) {
            continue;
        }
        if pending_dash && !out.is_empty() {
            out.push('-');
        }
        pending_dash = false;
        out.push(c);
    }

    out.trim_matches(|c| c == '-' || c == '.').to_string()
}

/// Pick the `id_string` for a candidate that did not name one explicitly.
pub fn derive_id_string(candidate: &IdentityCandidate) -> String {
    candidate
        .file_name
        .as_deref()
        .map(strip_extension)
        .map(sanitize_id)
        .filter(|s| !s.is_empty())
        .or_else(|| metadata_name(&candidate.credential))
        .unwrap_or_else(generated_id)
}

/// Human-readable label carried inside the credential, trimmed but
/// otherwise as written.
pub fn metadata_label(credential: &serde_json::Value) -> Option<String> {
    METADATA_KEYS
        .iter()
        .filter_map(|key| credential.get(*key).and_then(|v| v.as_str()))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(String::from)
}

/// Credential metadata reduced to an `id_string` candidate.
pub fn metadata_name(credential: &serde_json::Value) -> Option<String> {
    METADATA_KEYS
        .iter()
        .filter_map(|key| credential.get(*key).and_then(|v| v.as_str()))
        .map(sanitize_id)
        .find(|s| !s.is_empty())
}

fn strip_extension(file_name: &str) -> &str {
    // keep only the last path component a browser might hand us
    let base = file_name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(file_name);
    match base.rfind('.') {
        Some(0) | None => base,
        Some(idx) => &base[..idx],
    }
}

fn generated_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("identity-{millis}-{}", &suffix[..8])
}
