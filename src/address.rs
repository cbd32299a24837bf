use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ADDRESS_LEN: usize = 42;
pub const ADDRESS_HEX_DIGITS: usize = 40;

const _: [(); ADDRESS_LEN - ADDRESS_HEX_DIGITS - 2] = [(); 0];

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("address must be {ADDRESS_LEN} characters, got {0}")]
    BadLength(usize),
    #[error("address must start with 0x")]
    MissingPrefix,
    #[error("address contains a non-hex character")]
    InvalidHex,
}

/// A 20-byte account address in its `0x`-prefixed hex string form.
///
/// The caller's casing is preserved for display. Equality, hashing and the
/// rate-limit storage key are case-insensitive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Address(String);

impl Address {
    pub fn parse(value: &str) -> Result<Self, AddressError> {
        let trimmed = value.trim();
        if trimmed.len() != ADDRESS_LEN {
            return Err(AddressError::BadLength(trimmed.len()));
        }
        if !trimmed.starts_with("0x") {
            return Err(AddressError::MissingPrefix);
        }
        if !trimmed[2..].bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(AddressError::InvalidHex);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lowercase form used as the rate-limit lookup key.
    pub fn normalized(&self) -> String {
        self.0.to_ascii_lowercase()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for Address {}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
    }
}

impl TryFrom<String> for Address {
    type Error = AddressError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Address> for String {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

pub fn is_valid_address(value: &str) -> bool {
    Address::parse(value).is_ok()
}

/// Transaction identifier returned by a submission, kept in the string form
/// the chain reported it in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxHash(String);

impl TxHash {
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        assert!(!value.is_empty(), "Transaction hash cannot be empty");
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
