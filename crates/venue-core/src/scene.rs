use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Identifier of the scene every audience client should be showing.
///
/// Clients resolve it to a page (`scenes/<idx>-audience.html`), so both
/// numeric and named scenes are accepted and echoed back unchanged.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SceneIndex {
    Number(i64),
    Name(String),
}

impl fmt::Display for SceneIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Name(s) => f.write_str(s),
        }
    }
}

impl From<i64> for SceneIndex {
    fn from(n: i64) -> Self {
        Self::Number(n)
    }
}

impl From<&str> for SceneIndex {
    fn from(s: &str) -> Self {
        Self::Name(s.to_owned())
    }
}

/// Numeric text becomes `Number`, anything else a `Name`.
impl FromStr for SceneIndex {
    type Err = std::convert::Infallible;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        Ok(trimmed
            .parse::<i64>()
            .map_or_else(|_| Self::Name(trimmed.to_owned()), Self::Number))
    }
}
