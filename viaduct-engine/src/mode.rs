//! Travel mode selection for the `{profile}` URL path segment (§4.K).
//!
//! The OSM-tag-based weight/turn-restriction assignment that produces a
//! per-mode graph is extractor territory (out of scope per §1); this is
//! only the thin enum a loaded container's per-mode index is keyed by.

use std::fmt;

use serde::Serialize;
use viaduct_common::{Error, ErrorCode, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Car,
    Bike,
    Foot,
}

impl Mode {
    pub fn parse(profile: &str) -> Result<Self> {
        match profile {
            "car" => Ok(Mode::Car),
            "bike" => Ok(Mode::Bike),
            "foot" => Ok(Mode::Foot),
            other => Err(Error::new(
                ErrorCode::InvalidOptions,
                format!("unknown profile '{other}'"),
            )),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Mode::Car => "car",
            Mode::Bike => "bike",
            Mode::Foot => "foot",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_profiles() {
        assert_eq!(Mode::parse("car").unwrap(), Mode::Car);
        assert!(Mode::parse("spaceship").is_err());
    }
}
