//! Field definitions and decoding rules

use serde::{Deserialize, Serialize};

use super::{DecodeError, ValueFormat, MAX_TOKEN_LENGTH};
use crate::package::CatalogError;

/// Positional numeric rule: a big-endian integer spread over consecutive
/// hex tokens, scaled and offset into a physical value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericRule {
    /// Index of the first hex token (0 is the response service id)
    pub start_token: usize,
    /// Number of tokens (bytes) making up the raw value
    pub token_length: usize,
    /// Added after scaling
    pub offset: f64,
    /// Raw value is divided by this
    pub scale: f64,
    /// Display format
    pub format: ValueFormat,
}

impl NumericRule {
    /// Check the rule can decode anything at all
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.token_length == 0 || self.token_length > MAX_TOKEN_LENGTH {
            return Err(CatalogError::InvalidWidth(self.token_length));
        }
        if self.scale == 0.0 || !self.scale.is_finite() {
            return Err(CatalogError::InvalidScale(self.scale));
        }
        if !self.offset.is_finite() {
            return Err(CatalogError::InvalidOffset(self.offset));
        }
        Ok(())
    }
}

/// How a field is extracted from a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FieldRule {
    /// Positional hex decoding
    Numeric(NumericRule),
    /// The whole response is the value (e.g. `12.6V` for `ATRV`)
    Text,
}

/// A single named value decodable from a command response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FieldDef")]
pub struct Field {
    key: String,
    description: String,
    rule: FieldRule,
}

/// Unvalidated field as read from a catalog file
#[derive(Deserialize)]
struct FieldDef {
    key: String,
    description: String,
    rule: FieldRule,
}

impl TryFrom<FieldDef> for Field {
    type Error = CatalogError;

    fn try_from(def: FieldDef) -> Result<Self, Self::Error> {
        if let FieldRule::Numeric(rule) = &def.rule {
            rule.validate()?;
        }
        Ok(Self {
            key: def.key,
            description: def.description,
            rule: def.rule,
        })
    }
}

impl Field {
    /// Create a positional numeric field
    pub fn numeric(
        key: impl Into<String>,
        description: impl Into<String>,
        start_token: usize,
        token_length: usize,
        offset: f64,
        scale: f64,
        pattern: &str,
    ) -> Result<Self, CatalogError> {
        let rule = NumericRule {
            start_token,
            token_length,
            offset,
            scale,
            format: ValueFormat::parse(pattern)?,
        };
        rule.validate()?;

        Ok(Self {
            key: key.into(),
            description: description.into(),
            rule: FieldRule::Numeric(rule),
        })
    }

    /// Create a plain 16-bit field (no offset, no scaling)
    pub fn word(
        key: impl Into<String>,
        description: impl Into<String>,
        start_token: usize,
        pattern: &str,
    ) -> Result<Self, CatalogError> {
        Self::numeric(key, description, start_token, 2, 0.0, 1.0, pattern)
    }

    /// Create a text passthrough field
    pub fn text(key: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            rule: FieldRule::Text,
        }
    }

    /// Field key, unique within a package
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Human-readable description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Decoding rule
    pub fn rule(&self) -> &FieldRule {
        &self.rule
    }

    /// Decode the field as a number
    pub fn value(&self, response: &str) -> Result<f64, DecodeError> {
        match &self.rule {
            FieldRule::Numeric(rule) => decode_numeric(response, rule),
            FieldRule::Text => decode_text_value(response),
        }
    }

    /// Decode the field as display text, units included
    pub fn text_value(&self, response: &str) -> Result<String, DecodeError> {
        match &self.rule {
            FieldRule::Numeric(rule) => {
                decode_numeric(response, rule).map(|value| rule.format.format(value))
            }
            FieldRule::Text => Ok(response.to_string()),
        }
    }
}

/// Read the raw unsigned value spanning `[start, start + length)` tokens
fn read_raw(response: &str, start: usize, length: usize) -> Result<u64, DecodeError> {
    if length == 0 || length > MAX_TOKEN_LENGTH {
        return Err(DecodeError::UnsupportedWidth(length));
    }

    let tokens: Vec<&str> = response.split_whitespace().collect();
    let out_of_range = || DecodeError::TokenOutOfRange {
        index: start.saturating_add(length - 1),
        available: tokens.len(),
    };
    let end = start.checked_add(length).ok_or_else(out_of_range)?;
    if end > tokens.len() {
        return Err(out_of_range());
    }

    let mut hex = String::with_capacity(length * 2);
    for token in &tokens[start..end] {
        if !token.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(DecodeError::InvalidHex(token.to_string()));
        }
        hex.push_str(token);
    }

    let overflow = || DecodeError::Overflow {
        hex: hex.clone(),
        bits: length * 8,
    };
    if hex.len() > length * 2 {
        return Err(overflow());
    }
    u64::from_str_radix(&hex, 16).map_err(|_| overflow())
}

/// Decode a positional numeric field from a space separated hex response
pub fn decode_numeric(response: &str, rule: &NumericRule) -> Result<f64, DecodeError> {
    let raw = read_raw(response, rule.start_token, rule.token_length)?;

    // Two's complement only for 16-bit fields
    let raw = if rule.token_length == 2 && raw > 0x7FFF {
        raw as f64 - 65536.0
    } else {
        raw as f64
    };

    Ok(raw / rule.scale + rule.offset)
}

/// Numeric projection of a text response: everything except digits and
/// dots is dropped before parsing
pub fn decode_text_value(response: &str) -> Result<f64, DecodeError> {
    let residue: String = response
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();

    residue
        .parse::<f64>()
        .map_err(|_| DecodeError::InvalidNumber(response.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAF_RESPONSE: &str =
        "61 20 03 5A 03 3C 03 FE 00 01 00 94 00 4A 01 B3 01 6E 01 0C 03 02 02 66 00 84 00 5C 03 A0 03 03";
    const INJ_RESPONSE: &str =
        "61 28 02 EE 03 2C 02 EE 02 EE 02 EC 02 EE 02 EE 00 00 00 CC FF 3C 00 68 FF FB FF 94 00 00 F6";

    #[test]
    fn test_word_field() {
        let field = Field::word("maf_actual", "MAF actual", 14, "#").unwrap();
        assert_eq!(field.text_value(MAF_RESPONSE).unwrap(), "435");
        assert_eq!(field.value(MAF_RESPONSE).unwrap(), 435.0);
    }

    #[test]
    fn test_sign_correction_for_16_bit_fields() {
        let field =
            Field::numeric("inj2_cor", "Injector 2", 20, 2, 0.0, 100.0, "+#.##;-#.##").unwrap();
        assert_eq!(field.text_value(INJ_RESPONSE).unwrap(), "-1.96");

        let rule = NumericRule {
            start_token: 20,
            token_length: 2,
            offset: 0.0,
            scale: 1.0,
            format: ValueFormat::default(),
        };
        assert_eq!(decode_numeric(INJ_RESPONSE, &rule).unwrap(), -196.0);
    }

    #[test]
    fn test_no_sign_correction_for_other_widths() {
        let byte = NumericRule {
            start_token: 20,
            token_length: 1,
            offset: 0.0,
            scale: 1.0,
            format: ValueFormat::default(),
        };
        assert_eq!(decode_numeric(INJ_RESPONSE, &byte).unwrap(), 255.0);

        let wide = NumericRule {
            token_length: 4,
            ..byte
        };
        // FF 3C 00 68
        assert_eq!(decode_numeric(INJ_RESPONSE, &wide).unwrap(), 4_282_122_344.0);
    }

    #[test]
    fn test_scale_applied_before_offset() {
        let field =
            Field::numeric("coolant", "Coolant", 2, 2, -273.1, 10.0, "## C").unwrap();
        // 0x0B3E = 2878 -> 287.8 - 273.1 = 14.7
        let response = "61 12 0B 3E";
        let value = field.value(response).unwrap();
        assert!((value - 14.7).abs() < 1e-9);
        assert_eq!(field.text_value(response).unwrap(), "15 C");
    }

    #[test]
    fn test_hex_is_case_insensitive() {
        let field = Field::word("x", "x", 0, "#").unwrap();
        assert_eq!(field.value("0b 3e").unwrap(), 2878.0);
    }

    #[test]
    fn test_token_out_of_range() {
        let field = Field::word("aap", "AAP", 30, "#").unwrap();
        assert_eq!(
            field.value("61 12 0B"),
            Err(DecodeError::TokenOutOfRange {
                index: 31,
                available: 3
            })
        );
    }

    #[test]
    fn test_huge_start_token_is_out_of_range() {
        let rule = NumericRule {
            start_token: usize::MAX,
            token_length: 2,
            offset: 0.0,
            scale: 1.0,
            format: ValueFormat::default(),
        };
        assert_eq!(
            decode_numeric("61 12 0B", &rule),
            Err(DecodeError::TokenOutOfRange {
                index: usize::MAX,
                available: 3
            })
        );
    }

    #[test]
    fn test_deserialized_rules_are_validated() {
        let field = |scale: f64, width: usize| {
            serde_json::from_value::<Field>(serde_json::json!({
                "key": "k",
                "description": "d",
                "rule": {
                    "kind": "numeric",
                    "start_token": 2,
                    "token_length": width,
                    "offset": 0.0,
                    "scale": scale,
                    "format": "#"
                }
            }))
        };
        assert!(field(1.0, 2).is_ok());
        assert!(field(0.0, 2).is_err());
        assert!(field(1.0, 0).is_err());
        assert!(field(1.0, 9).is_err());

        let text: Field = serde_json::from_value(serde_json::json!({
            "key": "Voltage",
            "description": "Battery voltage",
            "rule": { "kind": "text" }
        }))
        .unwrap();
        assert_eq!(text, Field::text("Voltage", "Battery voltage"));
    }

    #[test]
    fn test_invalid_hex_token() {
        let field = Field::word("x", "x", 1, "#").unwrap();
        assert_eq!(
            field.value("61 NO DATA"),
            Err(DecodeError::InvalidHex("NO".to_string()))
        );
    }

    #[test]
    fn test_oversized_token_overflows() {
        let field = Field::word("x", "x", 0, "#").unwrap();
        assert!(matches!(
            field.value("ABC DE"),
            Err(DecodeError::Overflow { bits: 16, .. })
        ));
    }

    #[test]
    fn test_text_field() {
        let field = Field::text("Voltage", "Battery voltage");
        assert_eq!(field.text_value("12.6V").unwrap(), "12.6V");
        assert_eq!(field.value("12.6V").unwrap(), 12.6);
        assert!(matches!(
            field.value("NO DATA"),
            Err(DecodeError::InvalidNumber(_))
        ));
    }

    #[test]
    fn test_invalid_rules_rejected() {
        assert!(matches!(
            Field::numeric("x", "x", 0, 2, 0.0, 0.0, "#"),
            Err(CatalogError::InvalidScale(_))
        ));
        assert!(matches!(
            Field::numeric("x", "x", 0, 9, 0.0, 1.0, "#"),
            Err(CatalogError::InvalidWidth(9))
        ));
        assert!(matches!(
            Field::numeric("x", "x", 0, 2, 0.0, 1.0, "mbar"),
            Err(CatalogError::Pattern(_))
        ));
    }
}
