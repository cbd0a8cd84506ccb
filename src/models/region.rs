//! Administrative grouping types for region scans.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::geometry::BoundingBox;

/// Depth of the administrative grouping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum AdminLevel {
    /// State / province
    Admin1,
    /// County / district
    Admin2,
}

impl AdminLevel {
    /// Grouping columns, outermost first.
    pub fn group_columns(&self) -> &'static [&'static str] {
        match self {
            AdminLevel::Admin1 => &["country", "admin1"],
            AdminLevel::Admin2 => &["country", "admin1", "admin2"],
        }
    }
}

impl std::fmt::Display for AdminLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminLevel::Admin1 => write!(f, "admin1"),
            AdminLevel::Admin2 => write!(f, "admin2"),
        }
    }
}

impl FromStr for AdminLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin1" => Ok(AdminLevel::Admin1),
            "admin2" => Ok(AdminLevel::Admin2),
            other => Err(format!("unknown admin level '{other}' (expected admin1 or admin2)")),
        }
    }
}

/// Aggregate statistics for features sharing an administrative identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionDescriptor {
    pub country: String,
    pub admin1: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub admin2: Option<String>,
    pub feature_count: u64,
    pub bounds: BoundingBox,
}

impl RegionDescriptor {
    /// Non-empty identity parts, outermost first.
    pub fn identity_parts(&self) -> Vec<&str> {
        [Some(self.country.as_str()), Some(self.admin1.as_str()), self.admin2.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect()
    }

    /// e.g. `US / WA (300 features)`
    pub fn label(&self) -> String {
        format!(
            "{} ({} features)",
            self.identity_parts().join(" / "),
            self.feature_count
        )
    }

    /// Lower-cased identity joined with `-`, whitespace folded to `_`.
    pub fn slug(&self) -> String {
        self.identity_parts()
            .iter()
            .map(|part| part.split_whitespace().collect::<Vec<_>>().join("_").to_lowercase())
            .collect::<Vec<_>>()
            .join("-")
    }
}
