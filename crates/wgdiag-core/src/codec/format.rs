//! Display formats for decoded values
//!
//! Supports the subset of decimal-format patterns used by diagnostic
//! catalogs:
//!
//! - `#` / `0` integer digits (`0` pads with zeros)
//! - `.` followed by `0` (required) and `#` (optional) fraction digits
//! - literal prefix and suffix text, with `'quoted'` literals (`# '%'`)
//! - an optional `positive;negative` pair (`+#.##;-#.##`)
//!
//! Values are rounded half-to-even on their decimal expansion. At least one
//! integer digit is always printed.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error raised for a malformed format pattern
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid format pattern '{pattern}': {message}")]
pub struct PatternError {
    /// The offending pattern
    pub pattern: String,
    /// What is wrong with it
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Affixes {
    prefix: String,
    suffix: String,
}

/// A parsed value format pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ValueFormat {
    pattern: String,
    positive: Affixes,
    negative: Affixes,
    min_integer_digits: usize,
    min_fraction_digits: usize,
    max_fraction_digits: usize,
}

/// One side of a `positive;negative` pattern
struct SubPattern {
    affixes: Affixes,
    min_integer_digits: usize,
    min_fraction_digits: usize,
    max_fraction_digits: usize,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Part {
    Prefix,
    Integer,
    Fraction,
    Suffix,
}

fn parse_subpattern(text: &str) -> Result<SubPattern, String> {
    let mut affixes = Affixes::default();
    let mut min_int = 0;
    let mut min_frac = 0;
    let mut max_frac = 0;
    let mut seen_digit = false;
    let mut part = Part::Prefix;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                let mut literal = String::new();
                if chars.peek() == Some(&'\'') {
                    chars.next();
                    literal.push('\'');
                } else {
                    loop {
                        match chars.next() {
                            Some('\'') => break,
                            Some(ch) => literal.push(ch),
                            None => return Err("unterminated quote".to_string()),
                        }
                    }
                }
                if part == Part::Prefix {
                    affixes.prefix.push_str(&literal);
                } else {
                    part = Part::Suffix;
                    affixes.suffix.push_str(&literal);
                }
            }
            '#' | '0' if part != Part::Suffix => {
                seen_digit = true;
                match part {
                    Part::Prefix | Part::Integer => {
                        part = Part::Integer;
                        if c == '0' {
                            min_int += 1;
                        } else if min_int > 0 {
                            return Err("'#' after '0' in integer part".to_string());
                        }
                    }
                    Part::Fraction | Part::Suffix => {
                        if c == '0' {
                            if max_frac > min_frac {
                                return Err("'0' after '#' in fraction part".to_string());
                            }
                            min_frac += 1;
                        }
                        max_frac += 1;
                    }
                }
            }
            ',' if part == Part::Integer => {
                // Grouping separators are accepted and ignored
            }
            '.' if matches!(part, Part::Prefix | Part::Integer) => {
                part = Part::Fraction;
            }
            _ => {
                if part == Part::Prefix {
                    affixes.prefix.push(c);
                } else {
                    part = Part::Suffix;
                    affixes.suffix.push(c);
                }
            }
        }
    }

    if !seen_digit {
        return Err("no digit placeholders".to_string());
    }

    Ok(SubPattern {
        affixes,
        min_integer_digits: min_int,
        min_fraction_digits: min_frac,
        max_fraction_digits: max_frac,
    })
}

/// Find the `;` separating the positive and negative sub-patterns,
/// ignoring quoted text
fn split_subpatterns(pattern: &str) -> (&str, Option<&str>) {
    let mut quoted = false;
    for (idx, c) in pattern.char_indices() {
        match c {
            '\'' => quoted = !quoted,
            ';' if !quoted => return (&pattern[..idx], Some(&pattern[idx + 1..])),
            _ => {}
        }
    }
    (pattern, None)
}

impl ValueFormat {
    /// Parse a format pattern
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let err = |message: String| PatternError {
            pattern: pattern.to_string(),
            message,
        };

        let (positive, negative) = split_subpatterns(pattern);
        let positive = parse_subpattern(positive).map_err(err)?;

        // Only the affixes of the negative sub-pattern are used
        let negative = match negative {
            Some(text) => parse_subpattern(text).map_err(err)?.affixes,
            None => Affixes {
                prefix: format!("-{}", positive.affixes.prefix),
                suffix: positive.affixes.suffix.clone(),
            },
        };

        Ok(Self {
            pattern: pattern.to_string(),
            positive: positive.affixes,
            negative,
            min_integer_digits: positive.min_integer_digits,
            min_fraction_digits: positive.min_fraction_digits,
            max_fraction_digits: positive.max_fraction_digits,
        })
    }

    /// The pattern this format was parsed from
    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    /// Maximum number of fraction digits printed
    pub fn max_fraction_digits(&self) -> usize {
        self.max_fraction_digits
    }

    /// Format a value according to the pattern
    pub fn format(&self, value: f64) -> String {
        if !value.is_finite() {
            return value.to_string();
        }

        let mut digits = format!("{:.*}", self.max_fraction_digits, value.abs());

        if let Some(dot) = digits.find('.') {
            let keep = dot + 1 + self.min_fraction_digits;
            while digits.len() > keep && digits.ends_with('0') {
                digits.pop();
            }
            if digits.ends_with('.') {
                digits.pop();
            }
        }

        let integer_len = digits.find('.').unwrap_or(digits.len());
        if integer_len < self.min_integer_digits {
            let padding = "0".repeat(self.min_integer_digits - integer_len);
            digits.insert_str(0, &padding);
        }

        // A value that rounds to zero is printed without a minus sign
        let negative = value < 0.0 && digits.bytes().any(|b| matches!(b, b'1'..=b'9'));
        let affixes = if negative {
            &self.negative
        } else {
            &self.positive
        };

        format!("{}{}{}", affixes.prefix, digits, affixes.suffix)
    }
}

impl Default for ValueFormat {
    fn default() -> Self {
        Self {
            pattern: "#".to_string(),
            positive: Affixes::default(),
            negative: Affixes {
                prefix: "-".to_string(),
                suffix: String::new(),
            },
            min_integer_digits: 0,
            min_fraction_digits: 0,
            max_fraction_digits: 0,
        }
    }
}

impl FromStr for ValueFormat {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ValueFormat {
    type Error = PatternError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ValueFormat> for String {
    fn from(value: ValueFormat) -> Self {
        value.pattern
    }
}

impl fmt::Display for ValueFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pattern)
    }
}
