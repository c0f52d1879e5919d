//! Validation Utilities

use thiserror::Error;

/// Validation error types
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Field required: {0}")]
    Required(String),

    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    #[error("Value out of range: {0}")]
    OutOfRange(String),
}

/// Maximum accepted content size in bytes
pub const MAX_CONTENT_BYTES: usize = 1024 * 1024;

/// Validate a user id
///
/// Valid user ids are:
/// - 1-128 characters
/// - No control characters
/// - No leading or trailing whitespace
pub fn validate_user_id(user_id: &str) -> Result<(), ValidationError> {
    if user_id.is_empty() {
        return Err(ValidationError::Required("user_id cannot be empty".into()));
    }

    if user_id.chars().count() > 128 {
        return Err(ValidationError::InvalidUserId(
            "user_id must be 128 characters or less".into(),
        ));
    }

    if let Some((i, c)) = user_id.chars().enumerate().find(|(_, c)| c.is_control()) {
        return Err(ValidationError::InvalidUserId(format!(
            "Invalid character {:?} at position {}",
            c, i
        )));
    }

    if user_id.trim() != user_id {
        return Err(ValidationError::InvalidUserId(
            "user_id cannot start or end with whitespace".into(),
        ));
    }

    Ok(())
}

/// Validate memory content
pub fn validate_content(content: &str) -> Result<(), ValidationError> {
    if content.trim().is_empty() {
        return Err(ValidationError::Required("content cannot be empty".into()));
    }

    if content.len() > MAX_CONTENT_BYTES {
        return Err(ValidationError::OutOfRange(format!(
            "content is {} bytes, limit is {}",
            content.len(),
            MAX_CONTENT_BYTES
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_user_id_valid() {
        assert!(validate_user_id("u1").is_ok());
        assert!(validate_user_id("user@example.com").is_ok());
        assert!(validate_user_id("Alice Smith").is_ok());
    }

    #[test]
    fn test_validate_user_id_invalid() {
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id(" u1").is_err());
        assert!(validate_user_id("u1\n").is_err());
        assert!(validate_user_id(&"x".repeat(129)).is_err());
    }

    #[test]
    fn test_validate_content() {
        assert!(validate_content("Q3 planning notes").is_ok());
        assert!(validate_content("   ").is_err());
        assert!(validate_content(&"a".repeat(MAX_CONTENT_BYTES + 1)).is_err());
    }
}
