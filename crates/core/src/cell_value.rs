use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_def::FieldType;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CellValue {
    Null,
    Text(String),
    Number(f64),
    Date(NaiveDate),
}

impl PartialEq for CellValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a.total_cmp(b).is_eq(),
            (Self::Date(a), Self::Date(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for CellValue {}

impl Default for CellValue {
    fn default() -> Self {
        Self::Null
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<NaiveDate> for CellValue {
    fn from(d: NaiveDate) -> Self {
        Self::Date(d)
    }
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            CellValue::Date(d) => Some(*d),
            _ => None,
        }
    }

    /// Plain-text form, also used as the initial editor contents.
    pub fn display(&self) -> String {
        match self {
            CellValue::Null => String::new(),
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => format!("{}", *n as i64),
            CellValue::Number(n) => n.to_string(),
            CellValue::Date(d) => d.format(DATE_FORMAT).to_string(),
        }
    }

    /// Parses editor input for a column of `field_type`. Blank input clears the cell.
    pub fn parse_as(field_type: FieldType, input: &str) -> Result<Self, CoreError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(CellValue::Null);
        }
        let invalid = || CoreError::InvalidValue {
            field_type: field_type.as_str().to_string(),
            input: input.to_string(),
        };
        match field_type {
            FieldType::Text | FieldType::Select => Ok(CellValue::Text(trimmed.to_string())),
            FieldType::Textarea => Ok(CellValue::Text(input.to_string())),
            FieldType::Number => trimmed
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(CellValue::Number)
                .ok_or_else(invalid),
            FieldType::Date => NaiveDate::parse_from_str(trimmed, DATE_FORMAT)
                .map(CellValue::Date)
                .map_err(|_| invalid()),
        }
    }

    pub fn to_msgpack(&self) -> Result<Vec<u8>, rmp_serde::encode::Error> {
        rmp_serde::to_vec(self)
    }

    pub fn from_msgpack(bytes: &[u8]) -> Result<Self, rmp_serde::decode::Error> {
        rmp_serde::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_respects_field_type() {
        assert_eq!(
            CellValue::parse_as(FieldType::Number, " 12.5 ").unwrap(),
            CellValue::Number(12.5)
        );
        assert_eq!(
            CellValue::parse_as(FieldType::Date, "2024-02-29").unwrap(),
            CellValue::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap())
        );
        assert_eq!(CellValue::parse_as(FieldType::Text, "   ").unwrap(), CellValue::Null);
        assert!(CellValue::parse_as(FieldType::Number, "twelve").is_err());
        assert!(CellValue::parse_as(FieldType::Number, "inf").is_err());
        assert!(CellValue::parse_as(FieldType::Date, "29/02/2024").is_err());
    }

    #[test]
    fn display_drops_integral_fraction() {
        assert_eq!(CellValue::Number(3.0).display(), "3");
        assert_eq!(CellValue::Number(3.25).display(), "3.25");
        assert_eq!(CellValue::Null.display(), "");
    }

    #[test]
    fn msgpack_preserves_dates() {
        let value = CellValue::Date(NaiveDate::from_ymd_opt(2023, 1, 9).unwrap());
        let bytes = value.to_msgpack().unwrap();
        assert_eq!(CellValue::from_msgpack(&bytes).unwrap(), value);
    }
}
