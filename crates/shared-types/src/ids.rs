//! # Chain Identifiers
//!
//! Blocks and transactions are content-addressed by 43-character base64url
//! strings. The newtypes here validate length and alphabet on construction
//! so that an invalid id can never travel through the rest of the system.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of every block and transaction id.
pub const ID_LENGTH: usize = 43;

/// Errors from id construction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    /// The id did not have exactly [`ID_LENGTH`] characters.
    #[error("id must be {ID_LENGTH} characters, got {0}")]
    BadLength(usize),

    /// The id contained a character outside the base64url alphabet.
    #[error("id contains non-base64url character {0:?}")]
    BadCharacter(char),
}

fn validate(s: &str) -> Result<(), IdError> {
    if s.len() != ID_LENGTH {
        return Err(IdError::BadLength(s.len()));
    }
    match s
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        Some(c) => Err(IdError::BadCharacter(c)),
        None => Ok(()),
    }
}

macro_rules! base64url_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// Validate and wrap an id string.
            pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
                let id = id.into();
                validate(&id)?;
                Ok(Self(id))
            }

            /// The id as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $name {
            type Error = IdError;

            fn try_from(s: String) -> Result<Self, Self::Error> {
                Self::new(s)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

base64url_id!(
    /// Identifier of a block (its independent hash).
    BlockId
);

base64url_id!(
    /// Identifier of a transaction.
    TxId
);

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "oq-v4Cv61YAGmY_KlLdxmGp5HjcldvOSLOMv0UPjSTE";

    #[test]
    fn accepts_valid_id() {
        let id = TxId::new(GOOD).unwrap();
        assert_eq!(id.as_str(), GOOD);
        assert_eq!(id.to_string(), GOOD);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(TxId::new("short"), Err(IdError::BadLength(5)));
    }

    #[test]
    fn rejects_bad_alphabet() {
        let bad = format!("{}+", &GOOD[..ID_LENGTH - 1]);
        assert_eq!(BlockId::new(bad), Err(IdError::BadCharacter('+')));
    }

    #[test]
    fn serde_round_trip() {
        let id: TxId = serde_json::from_str(&format!("\"{GOOD}\"")).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), format!("\"{GOOD}\""));
    }

    #[test]
    fn serde_rejects_invalid() {
        assert!(serde_json::from_str::<TxId>("\"nope\"").is_err());
    }
}
