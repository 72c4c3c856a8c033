//! Key validation and the autofix pipeline: whitespace or overlength raw
//! keys get replaced with a deterministic SHA1-hex digest before the
//! namespace prefix is applied.

use sha1::{Digest, Sha1};

use crate::protocol::MAX_KEY_LEN;

/// True if `key` contains any ASCII whitespace or control character that
/// the text protocol can't carry in a key token.
pub(crate) fn contains_whitespace(key: &[u8]) -> bool {
    key.iter().any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
}

/// Replace `key` with `"<sha1-hex>-autofixed"`. Applied to the raw,
/// pre-namespace key; the namespace and separator are prepended
/// afterwards by the caller.
pub(crate) fn sha1_autofix(key: &[u8]) -> Vec<u8> {
    let digest = Sha1::digest(key);
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}-autofixed", hex).into_bytes()
}

/// Build the final wire key: autofix the raw key (if enabled) when it
/// contains whitespace/control bytes or `namespace + separator + raw_key`
/// would exceed [`MAX_KEY_LEN`], then prepend the namespace. With autofix
/// disabled, a violating key is left as-is for the caller to reject.
pub(crate) fn make_cache_key(
    namespace: &str,
    separator: &str,
    autofix: bool,
    raw_key: &[u8],
) -> Vec<u8> {
    let prefix_len = if namespace.is_empty() {
        0
    } else {
        namespace.len() + separator.len()
    };

    let needs_fix = contains_whitespace(raw_key) || prefix_len + raw_key.len() > MAX_KEY_LEN;
    let body = if autofix && needs_fix {
        sha1_autofix(raw_key)
    } else {
        raw_key.to_vec()
    };

    if namespace.is_empty() {
        body
    } else {
        let mut out = namespace.as_bytes().to_vec();
        out.extend_from_slice(separator.as_bytes());
        out.extend_from_slice(&body);
        out
    }
}

/// True if `cache_key` violates the final wire constraints (whitespace,
/// or longer than [`MAX_KEY_LEN`]). Checked after namespacing/autofix so
/// a disabled or unsuccessful autofix still surfaces as an argument error.
pub(crate) fn is_invalid_cache_key(cache_key: &[u8]) -> bool {
    contains_whitespace(cache_key) || cache_key.len() > MAX_KEY_LEN
}
