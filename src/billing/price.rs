//! Payment gateway price reference validation.

use crate::error::ClientError;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static PRICE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^pri_[a-z0-9]{26}$").expect("price reference pattern is valid"));

/// A price identifier the checkout widget will accept.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceReference(String);

impl PriceReference {
    pub fn parse(raw: &str) -> Result<Self, ClientError> {
        if PRICE_REFERENCE.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(ClientError::InvalidPriceReference(raw.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PriceReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
#[path = "tests/price_tests.rs"]
mod tests;
