use sha2::{Digest, Sha256};

/// Separator used when joining tokens before hashing.
pub const JOIN_SEPARATOR: &str = "|";

/// Hex-encoded SHA-256 of `input`.
pub fn hex_digest(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Digest of the pipe-joined tokens. Used for template IDs.
pub fn digest_tokens<S: AsRef<str>>(tokens: &[S]) -> String {
    let joined = tokens
        .iter()
        .map(|t| t.as_ref())
        .collect::<Vec<_>>()
        .join(JOIN_SEPARATOR);
    hex_digest(&joined)
}

/// Parameter ID: digest of the pipe-joined parameters followed by `|` and the template ID.
pub fn param_id<S: AsRef<str>>(parameters: &[S], template_id: &str) -> String {
    let mut joined = parameters
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join(JOIN_SEPARATOR);
    joined.push_str(JOIN_SEPARATOR);
    joined.push_str(template_id);
    hex_digest(&joined)
}
