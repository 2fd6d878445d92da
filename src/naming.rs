//! Metric/label name validation.
//!
//! Invalid names are rejected at construction time rather than sanitized
//! into a best-effort rewrite at render time, so a caller never has an
//! invalid name silently repaired underneath it.

use crate::error::{MetricsError, Result};

/// Validates a metric or label name against `^[a-zA-Z_][a-zA-Z0-9_]*$`.
pub fn validate_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return Err(MetricsError::InvalidName(name.to_owned())),
    }

    if chars.any(|c| !(c.is_ascii_alphanumeric() || c == '_')) {
        return Err(MetricsError::InvalidName(name.to_owned()));
    }

    Ok(())
}

/// Validates a label name: same pattern as [`validate_name`], plus the
/// `__`-prefix reservation.
pub fn validate_label_name(name: &str) -> Result<()> {
    validate_name(name)?;

    if name.starts_with("__") {
        return Err(MetricsError::ReservedLabelName(name.to_owned()));
    }

    Ok(())
}
