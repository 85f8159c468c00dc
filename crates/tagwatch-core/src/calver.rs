//! Calendar-version layout parsing and tag matching.
//!
//! A layout such as `YYYY.0M.0D` is compiled once per resolution; tags are
//! then matched strictly against it. An invalid layout is a configuration
//! error, while a tag that does not fit a valid layout is merely not a
//! candidate. Ranking of matching tags stays lexical, which is why padded
//! field variants (`0M`, `0D`) exist.

use crate::error::CoreError;

/// A single field of a calver layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Segment {
    /// Four-digit year.
    FullYear,
    /// Zero-padded two-digit year.
    PaddedYear,
    /// Short year without padding.
    ShortYear,
    /// Zero-padded month (`01`..`12`).
    PaddedMonth,
    /// Month without padding (`1`..`12`).
    Month,
    /// Zero-padded day (`01`..`31`).
    PaddedDay,
    /// Day without padding (`1`..`31`).
    Day,
    /// Literal separator character.
    Literal(char),
}

/// A compiled calendar-version layout.
#[derive(Debug, Clone)]
pub struct CalverLayout {
    layout: String,
    segments: Vec<Segment>,
}

impl CalverLayout {
    /// Compiles a layout string.
    ///
    /// Known fields are `YYYY`, `0Y`, `YY`, `0M`, `MM`, `0D` and `DD`; any
    /// other alphanumeric character is an error.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidCalverLayout`] for empty layouts or
    /// layouts containing unknown fields.
    pub fn parse(layout: &str) -> Result<Self, CoreError> {
        if layout.is_empty() {
            return Err(CoreError::InvalidCalverLayout {
                layout: layout.to_string(),
                reason: "empty layout".to_string(),
            });
        }

        let mut segments = Vec::new();
        let mut rest = layout;
        while !rest.is_empty() {
            let (segment, len) = if rest.starts_with("YYYY") {
                (Segment::FullYear, 4)
            } else if rest.starts_with("0Y") {
                (Segment::PaddedYear, 2)
            } else if rest.starts_with("YY") {
                (Segment::ShortYear, 2)
            } else if rest.starts_with("0M") {
                (Segment::PaddedMonth, 2)
            } else if rest.starts_with("MM") {
                (Segment::Month, 2)
            } else if rest.starts_with("0D") {
                (Segment::PaddedDay, 2)
            } else if rest.starts_with("DD") {
                (Segment::Day, 2)
            } else {
                let c = rest.chars().next().unwrap_or_default();
                if c.is_ascii_alphanumeric() {
                    return Err(CoreError::InvalidCalverLayout {
                        layout: layout.to_string(),
                        reason: format!("unknown field at '{rest}'"),
                    });
                }
                (Segment::Literal(c), c.len_utf8())
            };
            segments.push(segment);
            rest = &rest[len..];
        }

        Ok(Self {
            layout: layout.to_string(),
            segments,
        })
    }

    /// Returns the original layout string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.layout
    }

    /// Returns true if the whole tag matches the layout.
    #[must_use]
    pub fn matches(&self, tag: &str) -> bool {
        let mut rest = tag;
        for segment in &self.segments {
            let consumed = match segment {
                Segment::FullYear => take_exact_digits(rest, 4, 0, 9999),
                Segment::PaddedYear => take_exact_digits(rest, 2, 0, 99),
                Segment::ShortYear => take_digits(rest, 0, 999),
                Segment::PaddedMonth => take_exact_digits(rest, 2, 1, 12),
                Segment::Month => take_digits(rest, 1, 12),
                Segment::PaddedDay => take_exact_digits(rest, 2, 1, 31),
                Segment::Day => take_digits(rest, 1, 31),
                Segment::Literal(c) => {
                    if rest.starts_with(*c) {
                        Some(c.len_utf8())
                    } else {
                        None
                    }
                }
            };
            match consumed {
                Some(len) => rest = &rest[len..],
                None => return false,
            }
        }
        rest.is_empty()
    }
}

/// Consumes exactly `count` digits whose value lies in `min..=max`.
fn take_exact_digits(input: &str, count: usize, min: u32, max: u32) -> Option<usize> {
    let digits = input.get(..count)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let value: u32 = digits.parse().ok()?;
    (value >= min && value <= max).then_some(count)
}

/// Consumes a greedy run of digits without leading zeros, bounded by value.
fn take_digits(input: &str, min: u32, max: u32) -> Option<usize> {
    let len = input.bytes().take_while(u8::is_ascii_digit).count();
    if len == 0 {
        return None;
    }
    let digits = &input[..len];
    if len > 1 && digits.starts_with('0') {
        return None;
    }
    let value: u32 = digits.parse().ok()?;
    (value >= min && value <= max).then_some(len)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_common_layouts() {
        assert!(CalverLayout::parse("YYYY.0M.0D").is_ok());
        assert!(CalverLayout::parse("YY.MM").is_ok());
        assert!(CalverLayout::parse("YYYY-0M-0D").is_ok());
    }

    #[test]
    fn test_parse_invalid_layout_is_error() {
        assert!(CalverLayout::parse("").is_err());
        assert!(CalverLayout::parse("YYYY.QQ").is_err());
        assert!(CalverLayout::parse("banana").is_err());
    }

    #[test]
    fn test_matches_padded_date() {
        let layout = CalverLayout::parse("YYYY.0M.0D").unwrap();
        assert!(layout.matches("2024.01.15"));
        assert!(layout.matches("2023.12.01"));
        assert!(!layout.matches("2024.1.15"));
        assert!(!layout.matches("2024.13.01"));
        assert!(!layout.matches("2024.01.15-rc1"));
        assert!(!layout.matches("v2024.01.15"));
    }

    #[test]
    fn test_matches_unpadded_fields() {
        let layout = CalverLayout::parse("YY.MM").unwrap();
        assert!(layout.matches("24.1"));
        assert!(layout.matches("24.12"));
        assert!(!layout.matches("24.01"));
        assert!(!layout.matches("24.13"));
    }

    #[test]
    fn test_matches_requires_full_consumption() {
        let layout = CalverLayout::parse("YYYY").unwrap();
        assert!(layout.matches("2024"));
        assert!(!layout.matches("20245"));
        assert!(!layout.matches("2024.1"));
    }
}
