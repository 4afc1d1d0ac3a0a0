//! Archive description rules.
//!
//! The remote store strips leading whitespace and only accepts printable
//! 7-bit ASCII up to 1024 bytes. Validating locally keeps the cached name
//! identical to what later shows up in inventories.

/// Maximum description length in bytes.
pub const MAX_DESCRIPTION_LEN: usize = 1024;

/// Normalize and validate an archive description.
pub fn normalize_description(description: &str) -> crate::Result<String> {
    let trimmed = description.trim_start();
    if trimmed.is_empty() {
        return Err(crate::Error::InvalidDescription(
            "description cannot be empty".to_string(),
        ));
    }
    if trimmed.len() > MAX_DESCRIPTION_LEN {
        return Err(crate::Error::InvalidDescription(format!(
            "description is {} bytes (max: {MAX_DESCRIPTION_LEN})",
            trimmed.len()
        )));
    }
    if let Some(c) = trimmed.chars().find(|c| !matches!(c, ' '..='~')) {
        return Err(crate::Error::InvalidDescription(format!(
            "invalid character {c:?}: only printable ASCII is allowed"
        )));
    }
    Ok(trimmed.to_string())
}
