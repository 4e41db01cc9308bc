//! Thumbnail size directives.
//!
//! A size string is either a percentage of the source dimensions (`50%`) or
//! an explicit `WIDTHxHEIGHT` pair where either side may be `?` to preserve
//! the aspect ratio (`240x?`, `?x100`, `320x240`).

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

static PERCENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)%$").unwrap());

static DIMENSIONS_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+|\?)x(\d+|\?)$").unwrap());

/// Error returned for malformed or empty size strings.
///
/// The display text is relied on by callers and must stay `Invalid size string`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid size string")]
pub struct SizeSpecError {
    input: String,
}

impl SizeSpecError {
    fn new(input: &str) -> Self {
        Self {
            input: input.to_string(),
        }
    }

    /// The size string that failed to parse.
    pub fn input(&self) -> &str {
        &self.input
    }
}

/// Parsed size directive.
///
/// `Dimensions` can only be built through [`SizeSpec::parse`] or
/// [`SizeSpec::dimensions`], which keep at least one side set:
///
/// ```compile_fail
/// let size = vthumb_models::SizeSpec::Dimensions { width: None, height: None };
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSpec {
    /// Scale both axes by `n / 100` of the source dimensions.
    Percentage(u32),
    /// Explicit dimensions. `None` preserves the aspect ratio for that axis.
    /// At least one side is always set.
    #[non_exhaustive]
    Dimensions {
        width: Option<u32>,
        height: Option<u32>,
    },
}

impl SizeSpec {
    /// Parse a size string such as `240x100`, `?x100` or `50%`.
    pub fn parse(s: &str) -> Result<Self, SizeSpecError> {
        if let Some(caps) = PERCENT_PATTERN.captures(s) {
            let value: u32 = caps[1].parse().map_err(|_| SizeSpecError::new(s))?;
            if value == 0 {
                return Err(SizeSpecError::new(s));
            }
            return Ok(Self::Percentage(value));
        }

        let caps = DIMENSIONS_PATTERN
            .captures(s)
            .ok_or_else(|| SizeSpecError::new(s))?;

        let width = parse_side(&caps[1]).map_err(|_| SizeSpecError::new(s))?;
        let height = parse_side(&caps[2]).map_err(|_| SizeSpecError::new(s))?;

        Self::dimensions(width, height).ok_or_else(|| SizeSpecError::new(s))
    }

    /// Build a dimension directive. Zero counts as unset; returns `None`
    /// when neither side is set.
    pub fn dimensions(width: Option<u32>, height: Option<u32>) -> Option<Self> {
        let width = width.filter(|w| *w > 0);
        let height = height.filter(|h| *h > 0);

        if width.is_none() && height.is_none() {
            return None;
        }

        Some(Self::Dimensions { width, height })
    }

    /// Render the FFmpeg `scale` filter for this directive.
    ///
    /// Unset axes become `-1`, which FFmpeg reads as "keep aspect ratio".
    pub fn scale_filter(&self) -> String {
        match self {
            Self::Percentage(p) => {
                let factor = f64::from(*p) / 100.0;
                format!("scale=iw*{}:ih*{}", factor, factor)
            }
            Self::Dimensions { width, height } => format!(
                "scale={}:{}",
                axis_value(*width),
                axis_value(*height)
            ),
        }
    }
}

fn parse_side(side: &str) -> Result<Option<u32>, std::num::ParseIntError> {
    if side == "?" {
        Ok(None)
    } else {
        side.parse().map(Some)
    }
}

fn axis_value(value: Option<u32>) -> String {
    value.map_or_else(|| "-1".to_string(), |v| v.to_string())
}

impl FromStr for SizeSpec {
    type Err = SizeSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Percentage(p) => write!(f, "{}%", p),
            Self::Dimensions { width, height } => {
                let side = |v: &Option<u32>| v.map_or_else(|| "?".to_string(), |v| v.to_string());
                write!(f, "{}x{}", side(width), side(height))
            }
        }
    }
}

impl Serialize for SizeSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SizeSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_dimensions() {
        assert_eq!(
            SizeSpec::parse("240x100").unwrap(),
            SizeSpec::Dimensions {
                width: Some(240),
                height: Some(100)
            }
        );
        assert_eq!(
            SizeSpec::parse("?x100").unwrap(),
            SizeSpec::Dimensions {
                width: None,
                height: Some(100)
            }
        );
        assert_eq!(
            SizeSpec::parse("50x?").unwrap(),
            SizeSpec::Dimensions {
                width: Some(50),
                height: None
            }
        );
    }

    #[test]
    fn test_parse_percentage() {
        assert_eq!(SizeSpec::parse("50%").unwrap(), SizeSpec::Percentage(50));
        assert_eq!(SizeSpec::parse("101%").unwrap(), SizeSpec::Percentage(101));
    }

    #[test]
    fn test_rejects_invalid_strings() {
        for input in ["?x?", "%", "not a size", "", "0%", "0x0", "0x?", " 50%", "240X100", "240x100 "] {
            let err = SizeSpec::parse(input).unwrap_err();
            assert_eq!(err.to_string(), "Invalid size string", "input: {:?}", input);
            assert_eq!(err.input(), input);
        }
    }

    #[test]
    fn test_zero_side_is_unset() {
        assert_eq!(
            SizeSpec::parse("0x120").unwrap(),
            SizeSpec::Dimensions {
                width: None,
                height: Some(120)
            }
        );
    }

    #[test]
    fn test_dimensions_constructor_requires_a_side() {
        assert_eq!(SizeSpec::dimensions(None, None), None);
        assert_eq!(SizeSpec::dimensions(Some(0), Some(0)), None);
        assert_eq!(
            SizeSpec::dimensions(Some(0), Some(90)).unwrap().scale_filter(),
            "scale=-1:90"
        );
    }

    #[test]
    fn test_scale_filter() {
        assert_eq!(SizeSpec::Percentage(25).scale_filter(), "scale=iw*0.25:ih*0.25");
        assert_eq!(SizeSpec::Percentage(100).scale_filter(), "scale=iw*1:ih*1");
        assert_eq!(SizeSpec::parse("50x?").unwrap().scale_filter(), "scale=50:-1");
        assert_eq!(SizeSpec::parse("?x50").unwrap().scale_filter(), "scale=-1:50");
        assert_eq!(SizeSpec::parse("100x50").unwrap().scale_filter(), "scale=100:50");
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for input in ["25%", "50x?", "?x50", "100x50"] {
            assert_eq!(SizeSpec::parse(input).unwrap().to_string(), input);
        }
    }

    #[test]
    fn test_serde_uses_string_form() {
        let size: SizeSpec = serde_json::from_str("\"240x?\"").unwrap();
        assert_eq!(serde_json::to_string(&size).unwrap(), "\"240x?\"");
        assert!(serde_json::from_str::<SizeSpec>("\"?x?\"").is_err());
    }
}
