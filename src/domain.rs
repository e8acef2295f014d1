use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Literal the reference spreadsheet reader yields for blank cells.
pub const MISSING_SENTINEL: &str = "nan";

/// Name of the flat tract identifier column in per-state population files.
pub const TRACT_ID_FIELD: &str = "GEOID10_TRACT";

/// State or territory code exactly as read from the reference table.
///
/// The value is not validated or normalised: leading zeros are kept and
/// whatever the spreadsheet holds is carried through unchanged.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FipsCode(String);

impl FipsCode {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for FipsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for FipsCode {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Outlying territories the survey API has no tract estimates for.
pub fn default_skip_codes() -> Vec<String> {
    ["60", "66", "69", "78"]
        .into_iter()
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SkipSet(BTreeSet<FipsCode>);

impl SkipSet {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(codes.into_iter().map(|code| FipsCode::new(code)).collect())
    }

    pub fn contains(&self, code: &FipsCode) -> bool {
        self.0.contains(code)
    }
}

/// Structured geographic index attached to each survey API row.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GeoKey(Vec<(String, String)>);

impl GeoKey {
    pub fn new(levels: Vec<(String, String)>) -> Self {
        Self(levels)
    }

    pub fn levels(&self) -> &[(String, String)] {
        &self.0
    }

    /// Concatenates level values in the order they were received.
    ///
    /// A state/county/tract key yields the 11 character tract GEOID.
    pub fn tract_id(&self) -> String {
        self.0.iter().map(|(_, value)| value.as_str()).collect()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for GeoKey {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(level, value)| (level.into(), value.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoFileType {
    Shp,
    GeoJson,
}
