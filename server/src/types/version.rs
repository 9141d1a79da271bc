//! Sequential patch versions.
//!
//! A version is the position of a committed patch in a data source's
//! history. Two sentinels sit below the real versions:
//!
//! - `UNSET` (-1): no value.
//! - `INIT` (0): the log exists but holds no patches.
//!
//! Real versions start at `FIRST` (1).

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Error returned when a version cannot be created or parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    /// The number is not a version (below -1).
    Invalid(i64),
    /// A marker version was used where a real one was required.
    NotAVersion(Version),
    /// The string form does not hold a number.
    Parse(String),
    /// The JSON value is neither a number nor a numeric string.
    Json(String),
}

impl fmt::Display for VersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Invalid(n) => write!(f, "bad version number: {n}"),
            Self::NotAVersion(v) => write!(f, "not a real version: {v}"),
            Self::Parse(s) => write!(f, "bad format for version: '{s}'"),
            Self::Json(s) => write!(f, "unrecognized JSON version: {s}"),
        }
    }
}

impl std::error::Error for VersionError {}

/// A patch version.
///
/// # Invariants
///
/// - The value is -1, 0, or a positive number.
/// - Ordering is the numeric order of the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version(i64);

impl Version {
    pub const UNSET: Self = Self(-1);
    pub const INIT: Self = Self(0);
    pub const FIRST: Self = Self(1);

    /// Create a version from its number.
    ///
    /// The sentinel numbers map onto the sentinel constants.
    ///
    /// # Errors
    ///
    /// Returns `VersionError::Invalid` for numbers below -1.
    pub const fn create(value: i64) -> Result<Self, VersionError> {
        if value < -1 {
            return Err(VersionError::Invalid(value));
        }
        Ok(Self(value))
    }

    /// Create a version from a store index, which always counts from 1.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn from_index(index: u64) -> Self {
        Self(index as i64)
    }

    /// Parse the parameter form.
    pub fn from_param(s: &str) -> Result<Self, VersionError> {
        let value = s
            .trim()
            .parse::<i64>()
            .map_err(|_| VersionError::Parse(s.to_string()))?;
        Self::create(value)
    }

    /// Read a version from a JSON value: a number or a numeric string.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, VersionError> {
        match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| VersionError::Json(n.to_string()))
                .and_then(Self::create),
            serde_json::Value::String(s) => Self::from_param(s),
            other => Err(VersionError::Json(other.to_string())),
        }
    }

    #[must_use]
    pub const fn value(self) -> i64 {
        self.0
    }

    /// The store index for a real version.
    #[must_use]
    #[allow(clippy::cast_sign_loss)]
    pub const fn as_index(self) -> Option<u64> {
        if self.is_valid() {
            Some(self.0 as u64)
        } else {
            None
        }
    }

    /// Whether this is a real version rather than a marker.
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 > Self::INIT.0
    }

    #[must_use]
    pub const fn is_unset(self) -> bool {
        self.0 == Self::UNSET.0
    }

    #[must_use]
    pub const fn is_init(self) -> bool {
        self.0 == Self::INIT.0
    }

    /// The following version. `INIT` increments to `FIRST`.
    ///
    /// # Errors
    ///
    /// Returns `VersionError::NotAVersion` for `UNSET`.
    pub const fn inc(self) -> Result<Self, VersionError> {
        if self.is_unset() {
            return Err(VersionError::NotAVersion(self));
        }
        Ok(Self(self.0 + 1))
    }

    /// The preceding version. `FIRST` decrements to `INIT`.
    ///
    /// # Errors
    ///
    /// Returns `VersionError::NotAVersion` for either marker.
    pub const fn dec(self) -> Result<Self, VersionError> {
        if !self.is_valid() {
            return Err(VersionError::NotAVersion(self));
        }
        Ok(Self(self.0 - 1))
    }

    #[must_use]
    pub const fn is_before(self, other: Self) -> bool {
        self.0 < other.0
    }

    #[must_use]
    pub const fn is_after(self, other: Self) -> bool {
        self.0 > other.0
    }

    #[must_use]
    pub fn as_param(self) -> String {
        self.0.to_string()
    }

    #[must_use]
    pub fn as_json(self) -> serde_json::Value {
        serde_json::Value::from(self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNSET => write!(f, "<unset>"),
            Self::INIT => write!(f, "<init>"),
            Self(n) => write!(f, "ver:{n}"),
        }
    }
}

impl Serialize for Version {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

impl<'de> Deserialize<'de> for Version {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_values() {
        assert_eq!(Version::UNSET.value(), -1);
        assert_eq!(Version::INIT.value(), 0);
        assert_eq!(Version::FIRST.value(), 1);
        assert_eq!(Version::FIRST.inc().map(Version::value), Ok(2));
        assert_eq!(Version::INIT.inc(), Ok(Version::FIRST));
    }

    #[test]
    fn test_create_maps_onto_sentinels() {
        assert_eq!(Version::create(-1), Ok(Version::UNSET));
        assert_eq!(Version::create(0), Ok(Version::INIT));
        assert_eq!(Version::create(1), Ok(Version::FIRST));
        assert_eq!(Version::create(-2), Err(VersionError::Invalid(-2)));
    }

    #[test]
    fn test_sentinels_roundtrip_json_and_param() {
        for v in [Version::UNSET, Version::INIT, Version::FIRST] {
            assert_eq!(Version::from_json(&v.as_json()), Ok(v));
            assert_eq!(Version::from_param(&v.as_param()), Ok(v));
        }
    }

    #[test]
    fn test_arbitrary_version_roundtrip() {
        let v = Version::create(9).expect("valid");
        assert_eq!(Version::from_json(&v.as_json()), Ok(v));
        assert_eq!(Version::from_param(&v.as_param()), Ok(v));
        assert!(v.is_valid());
        assert!(!v.is_init());
    }

    #[test]
    fn test_json_string_form_accepted() {
        let json = serde_json::json!("12");
        assert_eq!(Version::from_json(&json).map(Version::value), Ok(12));
        assert!(Version::from_json(&serde_json::json!("twelve")).is_err());
        assert!(Version::from_json(&serde_json::json!(true)).is_err());
    }

    #[test]
    fn test_ordering_is_strict() {
        let v2 = Version::create(2).expect("valid");
        assert!(Version::FIRST.is_before(v2));
        assert!(v2.is_after(Version::FIRST));
        assert!(!v2.is_before(v2));
        assert!(!v2.is_after(v2));
        assert!(Version::UNSET < Version::INIT);
    }

    #[test]
    fn test_dec_and_markers() {
        assert_eq!(Version::FIRST.dec(), Ok(Version::INIT));
        assert!(Version::INIT.dec().is_err());
        assert!(Version::UNSET.inc().is_err());
        assert!(!Version::INIT.is_valid());
        assert_eq!(Version::INIT.as_index(), None);
        assert_eq!(Version::FIRST.as_index(), Some(1));
    }

    #[test]
    fn test_display() {
        assert_eq!(Version::UNSET.to_string(), "<unset>");
        assert_eq!(Version::INIT.to_string(), "<init>");
        assert_eq!(Version::from_index(7).to_string(), "ver:7");
    }

    #[test]
    fn test_serde_as_number() {
        let v = Version::from_index(5);
        assert_eq!(serde_json::to_string(&v).expect("serialize"), "5");
        let back: Version = serde_json::from_str("\"5\"").expect("deserialize");
        assert_eq!(back, v);
    }
}
