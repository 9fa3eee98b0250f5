//! Capability blobs and stereotype matching.
//!
//! A capability blob is an unordered JSON object used both as a request
//! ("what the caller wants") and as a slot stereotype ("what a slot can
//! serve"). Matching is subset-style: every key present in the request must
//! be satisfied by the stereotype.
//!
//! Three keys carry dedicated rules:
//!
//! - `browserName` - exact string match
//! - `browserVersion` - prefix match on `.` boundaries; a request for
//!   `"121"` matches a stereotype of `"121.0.6167.85"`
//! - `platformName` - matched through a platform family tree, so a request
//!   for `WINDOWS` is satisfied by a `WIN10` stereotype
//!
//! All other keys compare by equality. A request value of `"ANY"` matches
//! every stereotype value. A request key missing from the stereotype fails
//! the match unless the key is `browserVersion` or configured as
//! informational.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Wildcard sentinel: a request value of `"ANY"` matches anything.
pub const ANY: &str = "ANY";

const BROWSER_VERSION: &str = "browserVersion";
const PLATFORM_NAME: &str = "platformName";

/// An unordered mapping from capability names to JSON values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Capabilities(Map<String, Value>);

impl Capabilities {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Build from a JSON value; anything but an object is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self(map)),
            other => Err(Error::InvalidArgument(format!(
                "capabilities must be a JSON object, got {other}"
            ))),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }

    /// Merge an always-match overlay into this first-match alternative.
    ///
    /// A key present on both sides is a caller error: the overlay is meant
    /// to carry exactly the properties the alternatives do not.
    pub fn merged_with(&self, overlay: &Capabilities) -> Result<Capabilities> {
        let mut merged = self.0.clone();
        for (key, value) in overlay.iter() {
            if merged.contains_key(key) {
                return Err(Error::InvalidArgument(format!(
                    "capability {key:?} appears in both alwaysMatch and firstMatch"
                )));
            }
            merged.insert(key.clone(), value.clone());
        }
        Ok(Capabilities(merged))
    }

    /// Whether this stereotype can serve the given request blob.
    pub fn satisfies(&self, request: &Capabilities, informational: &[String]) -> bool {
        for (key, wanted) in request.iter() {
            if matches!(wanted, Value::String(s) if s == ANY) {
                continue;
            }
            let declared = match self.get(key) {
                Some(declared) => declared,
                None => {
                    if key == BROWSER_VERSION || informational.iter().any(|k| k == key) {
                        continue;
                    }
                    return false;
                }
            };
            let matched = match key.as_str() {
                BROWSER_VERSION => match (declared.as_str(), wanted.as_str()) {
                    (Some(declared), Some(wanted)) => version_matches(declared, wanted),
                    _ => declared == wanted,
                },
                PLATFORM_NAME => match (declared.as_str(), wanted.as_str()) {
                    (Some(declared), Some(wanted)) => platform_matches(declared, wanted),
                    _ => declared == wanted,
                },
                _ => declared == wanted,
            };
            if !matched {
                return false;
            }
        }
        true
    }
}

/// Prefix match on `.` boundaries.
fn version_matches(declared: &str, wanted: &str) -> bool {
    if wanted.is_empty() || declared == wanted {
        return true;
    }
    declared
        .strip_prefix(wanted)
        .map_or(false, |rest| rest.starts_with('.'))
}

/// The family a platform name belongs to, if it is a known one.
fn platform_family(name: &str) -> Option<&'static str> {
    match name {
        "WINDOWS" | "WIN10" | "WIN11" | "WIN8" | "WIN8_1" | "WIN7" | "XP" | "VISTA" => {
            Some("WINDOWS")
        }
        "LINUX" | "UBUNTU" | "DEBIAN" | "FEDORA" => Some("LINUX"),
        "MAC" | "MACOS" | "DARWIN" | "SONOMA" | "SEQUOIA" | "VENTURA" | "MONTEREY" => Some("MAC"),
        "ANDROID" => Some("ANDROID"),
        "IOS" => Some("IOS"),
        _ => None,
    }
}

/// Case-insensitive equality, or a request for a family satisfied by any
/// of its members.
fn platform_matches(declared: &str, wanted: &str) -> bool {
    let declared = declared.trim().to_ascii_uppercase();
    let wanted = wanted.trim().to_ascii_uppercase();
    if declared == wanted {
        return true;
    }
    platform_family(&declared) == Some(wanted.as_str())
}
