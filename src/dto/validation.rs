//! Validation helpers for DTOs.

use validator::ValidationError;

/// Length of a human-facing room join code.
pub const JOIN_CODE_LENGTH: usize = 6;

const NICKNAME_MAX_LENGTH: usize = 24;

/// Validates that a join code is exactly 6 alphanumeric characters.
///
/// Case is not checked here: codes are case-insensitive on input and
/// normalized to uppercase before any lookup.
pub fn validate_join_code(code: &str) -> Result<(), ValidationError> {
    if code.len() != JOIN_CODE_LENGTH {
        let mut err = ValidationError::new("join_code_length");
        err.message = Some(
            format!(
                "Join code must be exactly {JOIN_CODE_LENGTH} characters (got {})",
                code.len()
            )
            .into(),
        );
        return Err(err);
    }

    if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
        let mut err = ValidationError::new("join_code_format");
        err.message = Some("Join code must contain only letters and digits".into());
        return Err(err);
    }

    Ok(())
}

/// Validates a player nickname: non-blank, at most 24 characters.
pub fn validate_nickname(nickname: &str) -> Result<(), ValidationError> {
    if nickname.trim().is_empty() {
        let mut err = ValidationError::new("nickname_blank");
        err.message = Some("Nickname must not be blank".into());
        return Err(err);
    }

    if nickname.chars().count() > NICKNAME_MAX_LENGTH {
        let mut err = ValidationError::new("nickname_length");
        err.message =
            Some(format!("Nickname must be at most {NICKNAME_MAX_LENGTH} characters").into());
        return Err(err);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_codes_accept_any_case() {
        assert!(validate_join_code("AB12CD").is_ok());
        assert!(validate_join_code("ab12cd").is_ok());
        assert!(validate_join_code("A1b2C3").is_ok());
    }

    #[test]
    fn join_codes_reject_bad_length_and_symbols() {
        assert!(validate_join_code("AB12C").is_err());
        assert!(validate_join_code("AB12CDE").is_err());
        assert!(validate_join_code("AB 2CD").is_err());
        assert!(validate_join_code("AB-2CD").is_err());
        assert!(validate_join_code("").is_err());
    }

    #[test]
    fn nicknames_reject_blank_and_oversized() {
        assert!(validate_nickname("Alice").is_ok());
        assert!(validate_nickname("   ").is_err());
        assert!(validate_nickname(&"x".repeat(25)).is_err());
    }
}
