//! Decimal module and schema versions
//!
//! Module code versions, installed versions and script ranges are all decimal
//! numbers such as `12.30` or `14.201`. They are stored as [`Decimal`] so that
//! `10.3` and `10.30` compare equal and chain arithmetic never suffers from
//! binary floating point drift.

use rust_decimal::Decimal;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// A monotonic decimal version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Version(Decimal);

/// Error returned when a version string cannot be parsed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version '{input}': {reason}")]
pub struct ParseVersionError {
    pub input: String,
    pub reason: String,
}

impl Version {
    /// The version of a module that has never been installed
    pub const ZERO: Version = Version(Decimal::ZERO);

    /// Build a version from a mantissa and a scale, e.g. `Version::new(1030, 2)` is `10.30`
    ///
    /// Negative mantissas are clamped to zero; versions never go below zero.
    #[must_use]
    pub fn new(mantissa: i64, scale: u32) -> Self {
        let value = Decimal::new(mantissa, scale);
        if value.is_sign_negative() {
            Self::ZERO
        } else {
            Self(value)
        }
    }

    /// Wrap a decimal value
    ///
    /// # Errors
    ///
    /// Returns `ParseVersionError` if the value is negative.
    pub fn from_decimal(value: Decimal) -> Result<Self, ParseVersionError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(ParseVersionError {
                input: value.to_string(),
                reason: "versions cannot be negative".to_string(),
            });
        }
        Ok(Self(value.abs()))
    }

    /// The underlying decimal value
    #[must_use]
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// True for the "not installed" version
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Version {
    /// Formats with at least two and at most three decimal places (`10.3` -> `10.30`)
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut value = self.0.round_dp(3).normalize();
        if value.scale() < 2 {
            value.rescale(2);
        }
        write!(f, "{value}")
    }
}

impl FromStr for Version {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let value = Decimal::from_str(trimmed).map_err(|e| ParseVersionError {
            input: s.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_decimal(value).map_err(|e| ParseVersionError {
            input: s.to_string(),
            reason: e.reason,
        })
    }
}

impl From<Decimal> for Version {
    fn from(value: Decimal) -> Self {
        if value.is_sign_negative() {
            Self::ZERO
        } else {
            Self(value)
        }
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Version {
    /// Accepts `"12.30"`, `12.3` or `12`
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct VersionVisitor;

        impl Visitor<'_> for VersionVisitor {
            type Value = Version;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a decimal version such as \"12.30\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Version, E> {
                Version::from_str(v).map_err(E::custom)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Version, E> {
                // Shortest round-trip rendering keeps 12.3 as "12.3" rather than its binary expansion
                Version::from_str(&v.to_string()).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Version, E> {
                Version::from_decimal(Decimal::from(v)).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Version, E> {
                Ok(Version(Decimal::from(v)))
            }
        }

        deserializer.deserialize_any(VersionVisitor)
    }
}
