//! Enrollment input validation.

use crate::types::IdentityKey;
use regex::Regex;
use thiserror::Error;

/// Secondary identifiers are three-digit PRN numbers unless configured otherwise.
pub const DEFAULT_SECONDARY_ID_PATTERN: &str = "^[0-9]{3}$";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Name cannot be empty")]
    EmptyName,
    #[error("User ID must be a number (got {0:?})")]
    NonNumericKey(String),
    #[error("User ID {0} is too large (maximum {max})", max = IdentityKey::MAX)]
    KeyOutOfRange(IdentityKey),
    #[error("secondary ID {value:?} does not match {pattern}")]
    SecondaryIdFormat { value: String, pattern: String },
}

/// Raw enrollment fields as submitted by a client.
#[derive(Debug, Clone)]
pub struct EnrollmentRequest {
    pub user_id: String,
    pub display_name: String,
    pub secondary_id: String,
}

/// Enrollment fields that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidEnrollment {
    pub identity_key: IdentityKey,
    pub display_name: String,
    pub secondary_id: String,
}

#[derive(Debug, Clone)]
pub struct Validator {
    secondary_id: Regex,
}

impl Validator {
    pub fn new(secondary_id_pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            secondary_id: Regex::new(secondary_id_pattern)?,
        })
    }

    pub fn validate(&self, request: &EnrollmentRequest) -> Result<ValidEnrollment, ValidationError> {
        let display_name = request.display_name.trim();
        if display_name.is_empty() {
            return Err(ValidationError::EmptyName);
        }

        let identity_key = IdentityKey::parse(&request.user_id)
            .ok_or_else(|| ValidationError::NonNumericKey(request.user_id.clone()))?;
        if identity_key > IdentityKey::MAX {
            return Err(ValidationError::KeyOutOfRange(identity_key));
        }

        if !self.secondary_id.is_match(&request.secondary_id) {
            return Err(ValidationError::SecondaryIdFormat {
                value: request.secondary_id.clone(),
                pattern: self.secondary_id.as_str().to_string(),
            });
        }

        Ok(ValidEnrollment {
            identity_key,
            display_name: display_name.to_string(),
            secondary_id: request.secondary_id.clone(),
        })
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(DEFAULT_SECONDARY_ID_PATTERN).expect("default secondary ID pattern compiles")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(user_id: &str, name: &str, prn: &str) -> EnrollmentRequest {
        EnrollmentRequest {
            user_id: user_id.into(),
            display_name: name.into(),
            secondary_id: prn.into(),
        }
    }

    #[test]
    fn test_valid_request() {
        let valid = Validator::default().validate(&request("42", "  Om ", "123")).unwrap();
        assert_eq!(valid.identity_key, IdentityKey(42));
        assert_eq!(valid.display_name, "Om");
        assert_eq!(valid.secondary_id, "123");
    }

    #[test]
    fn test_empty_name() {
        let err = Validator::default().validate(&request("42", "   ", "123")).unwrap_err();
        assert_eq!(err, ValidationError::EmptyName);
    }

    #[test]
    fn test_non_numeric_key() {
        let err = Validator::default().validate(&request("4x", "Om", "123")).unwrap_err();
        assert_eq!(err, ValidationError::NonNumericKey("4x".into()));
    }

    #[test]
    fn test_key_out_of_range() {
        let v = Validator::default();
        let max = i64::MAX.to_string();
        assert_eq!(v.validate(&request(&max, "Om", "123")).unwrap().identity_key, IdentityKey::MAX);

        let over = (i64::MAX as u64 + 1).to_string();
        let err = v.validate(&request(&over, "Om", "123")).unwrap_err();
        assert_eq!(err, ValidationError::KeyOutOfRange(IdentityKey(i64::MAX as u64 + 1)));
    }

    #[test]
    fn test_secondary_id_format() {
        let v = Validator::default();
        for bad in ["12", "1234", "12a", ""] {
            assert!(
                matches!(v.validate(&request("1", "Om", bad)), Err(ValidationError::SecondaryIdFormat { .. })),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_custom_pattern() {
        let v = Validator::new("^PRN-[0-9]+$").unwrap();
        assert!(v.validate(&request("1", "Om", "PRN-0042")).is_ok());
        assert!(v.validate(&request("1", "Om", "123")).is_err());
    }

    #[test]
    fn test_invalid_pattern() {
        assert!(Validator::new("([").is_err());
    }
}
