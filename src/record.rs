//! Application payload convention.
//!
//! Above the framing layer, records conventionally carry the form
//! `"UserID:<id> userName:<name> email:<email>"`. The framing layer treats
//! every record as an opaque string; this helper exists for applications
//! that want the typed form. Field validation beyond basic shape (numeric
//! id, single-token fields) is out of scope.

use std::{fmt, str::FromStr};

use thiserror::Error;

/// Errors produced when parsing the record convention.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RecordParseError {
    /// A required `<label>:` field was absent.
    #[error("missing {0} field")]
    MissingField(&'static str),
    /// The `UserID:` value was not a number.
    #[error("UserID is not numeric")]
    InvalidUserId,
}

/// Typed view of the conventional record payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    /// Numeric user identifier.
    pub user_id: u64,
    /// User name (single token; whitespace is the field separator).
    pub user_name: String,
    /// E-mail address.
    pub email: String,
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "UserID:{} userName:{} email:{}",
            self.user_id, self.user_name, self.email
        )
    }
}

impl FromStr for Record {
    type Err = RecordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut user_id = None;
        let mut user_name = None;
        let mut email = None;
        for token in s.split_whitespace() {
            if let Some(value) = token.strip_prefix("UserID:") {
                user_id = Some(value.parse().map_err(|_| RecordParseError::InvalidUserId)?);
            } else if let Some(value) = token.strip_prefix("userName:") {
                user_name = Some(value.to_owned());
            } else if let Some(value) = token.strip_prefix("email:") {
                email = Some(value.to_owned());
            }
        }
        Ok(Self {
            user_id: user_id.ok_or(RecordParseError::MissingField("UserID"))?,
            user_name: user_name.ok_or(RecordParseError::MissingField("userName"))?,
            email: email.ok_or(RecordParseError::MissingField("email"))?,
        })
    }
}
