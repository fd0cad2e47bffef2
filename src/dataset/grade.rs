//! Card condition grades.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Condition grade, from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Grade {
    /// Near mint.
    #[serde(rename = "NM")]
    NearMint,
    /// Slightly played.
    #[serde(rename = "SP")]
    SlightlyPlayed,
    /// Moderately played.
    #[serde(rename = "MP")]
    ModeratelyPlayed,
    /// Heavily played.
    #[serde(rename = "HP")]
    HeavilyPlayed,
    #[serde(rename = "D")]
    Damaged,
}

impl Grade {
    pub const ALL: [Grade; 5] = [
        Grade::NearMint,
        Grade::SlightlyPlayed,
        Grade::ModeratelyPlayed,
        Grade::HeavilyPlayed,
        Grade::Damaged,
    ];

    /// Short code used in file metadata and uploads.
    pub fn code(&self) -> &'static str {
        match self {
            Grade::NearMint => "NM",
            Grade::SlightlyPlayed => "SP",
            Grade::ModeratelyPlayed => "MP",
            Grade::HeavilyPlayed => "HP",
            Grade::Damaged => "D",
        }
    }

    /// Label shown to the user.
    pub fn label(&self) -> &'static str {
        match self {
            Grade::Damaged => "DAMAGED",
            other => other.code(),
        }
    }

    /// The worse of two grades.
    pub fn worst(self, other: Grade) -> Grade {
        self.max(other)
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Unknown grade code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown grade: {0}")]
pub struct ParseGradeError(pub String);

impl FromStr for Grade {
    type Err = ParseGradeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "NM" => Ok(Grade::NearMint),
            "SP" => Ok(Grade::SlightlyPlayed),
            "MP" => Ok(Grade::ModeratelyPlayed),
            "HP" => Ok(Grade::HeavilyPlayed),
            "D" | "DAMAGED" => Ok(Grade::Damaged),
            _ => Err(ParseGradeError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_grade() {
        assert_eq!(Grade::NearMint.worst(Grade::ModeratelyPlayed), Grade::ModeratelyPlayed);
        assert_eq!(Grade::Damaged.worst(Grade::SlightlyPlayed), Grade::Damaged);
        for g in Grade::ALL {
            assert_eq!(g.worst(g), g);
            assert_eq!(g.worst(Grade::NearMint), g);
        }
    }

    #[test]
    fn test_parse_codes_and_labels() {
        assert_eq!("sp".parse::<Grade>().unwrap(), Grade::SlightlyPlayed);
        assert_eq!("DAMAGED".parse::<Grade>().unwrap(), Grade::Damaged);
        assert!("EX".parse::<Grade>().is_err());
        assert_eq!(Grade::Damaged.label(), "DAMAGED");
        assert_eq!(Grade::Damaged.to_string(), "D");
    }

    #[test]
    fn test_serde_uses_codes() {
        assert_eq!(serde_json::to_string(&Grade::HeavilyPlayed).unwrap(), "\"HP\"");
        let g: Grade = serde_json::from_str("\"NM\"").unwrap();
        assert_eq!(g, Grade::NearMint);
    }
}
