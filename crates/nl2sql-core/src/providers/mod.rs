pub mod embedder;
pub mod llm;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Inference provider slot. Generation walks the configured slots in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Primary,
    Secondary,
    Tertiary,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::Primary, Provider::Secondary, Provider::Tertiary];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Tertiary => "tertiary",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "secondary" => Ok(Self::Secondary),
            "tertiary" => Ok(Self::Tertiary),
            other => Err(format!("unknown provider slot: {other}")),
        }
    }
}
