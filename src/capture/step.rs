//! Which side of the card is being captured.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Capture step: the two sides of a card, always FRONT first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureStep {
    #[default]
    Front,
    Back,
}

impl CaptureStep {
    /// File-name side tag.
    pub fn side(self) -> &'static str {
        match self {
            CaptureStep::Front => "front",
            CaptureStep::Back => "back",
        }
    }

    /// The step that follows this one within a card, if any.
    pub fn next(self) -> Option<CaptureStep> {
        match self {
            CaptureStep::Front => Some(CaptureStep::Back),
            CaptureStep::Back => None,
        }
    }
}

impl fmt::Display for CaptureStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureStep::Front => f.write_str("FRONT"),
            CaptureStep::Back => f.write_str("BACK"),
        }
    }
}

impl FromStr for CaptureStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" | "frente" => Ok(CaptureStep::Front),
            "back" | "verso" => Ok(CaptureStep::Back),
            other => Err(format!("unknown capture step: {other}")),
        }
    }
}
