//! Store-side value model and the read-path normalizer.
//!
//! The table keeps numbers as arbitrary-precision decimals (`N`). Callers on the
//! host side want plain integers, so every item coming out of a scan or query is
//! passed through [`normalize_item`]. The write path performs no conversion:
//! `Int` values are accepted as-is and the table stores them in its own form.

use std::collections::BTreeMap;
use std::str::FromStr;

use bigdecimal::{BigDecimal, ToPrimitive};
use serde::{Deserialize, Serialize};
use serde_json::{Number as JsonNumber, Value as JsonValue};

use crate::errors::{Result, StorageError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    #[serde(rename = "S")]
    S(String),
    #[serde(rename = "N")]
    N(BigDecimal),
    /// Host integer. Produced by [`normalize_item`], accepted on write.
    #[serde(rename = "INT")]
    Int(i64),
    #[serde(rename = "BOOL")]
    Bool(bool),
    #[serde(rename = "NULL")]
    Null,
}

/// A flat attribute map, the unit of storage.
pub type Item = BTreeMap<String, AttributeValue>;

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::S(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(value) => Some(*value),
            AttributeValue::N(value) => value.as_i64_exact(),
            _ => None,
        }
    }

    /// Converts a host integer into the store-native decimal form.
    pub fn to_native(&self) -> AttributeValue {
        match self {
            AttributeValue::Int(value) => AttributeValue::N(BigDecimal::from(*value)),
            other => other.clone(),
        }
    }

    /// Canonical text used for key comparison and index lookups.
    ///
    /// Numbers in either form render the same way so `Int(10)` and `N(10)`
    /// address the same item.
    pub fn key_text(&self) -> String {
        match self {
            AttributeValue::S(value) => value.clone(),
            AttributeValue::N(value) => match value.as_i64_exact() {
                Some(int) => int.to_string(),
                None => value.normalized().to_string(),
            },
            AttributeValue::Int(value) => value.to_string(),
            AttributeValue::Bool(value) => value.to_string(),
            AttributeValue::Null => String::new(),
        }
    }

    pub fn to_json(&self) -> JsonValue {
        match self {
            AttributeValue::S(value) => JsonValue::String(value.clone()),
            AttributeValue::Int(value) => JsonValue::Number((*value).into()),
            AttributeValue::N(value) => match value.as_i64_exact() {
                Some(int) => JsonValue::Number(int.into()),
                None => value
                    .to_f64()
                    .and_then(JsonNumber::from_f64)
                    .map(JsonValue::Number)
                    .unwrap_or_else(|| JsonValue::String(value.to_string())),
            },
            AttributeValue::Bool(value) => JsonValue::Bool(*value),
            AttributeValue::Null => JsonValue::Null,
        }
    }

    pub fn from_json(value: &JsonValue) -> Result<Self> {
        match value {
            JsonValue::String(text) => Ok(AttributeValue::S(text.clone())),
            JsonValue::Number(number) => BigDecimal::from_str(&number.to_string())
                .map(AttributeValue::N)
                .map_err(|err| StorageError::InvalidArg(format!("invalid number {number}: {err}"))),
            JsonValue::Bool(flag) => Ok(AttributeValue::Bool(*flag)),
            JsonValue::Null => Ok(AttributeValue::Null),
            JsonValue::Array(_) | JsonValue::Object(_) => Err(StorageError::InvalidArg(
                "nested values are not supported in flat items".to_string(),
            )),
        }
    }
}

trait ExactInt {
    fn as_i64_exact(&self) -> Option<i64>;
}

impl ExactInt for BigDecimal {
    fn as_i64_exact(&self) -> Option<i64> {
        if self.is_integer() {
            self.to_i64()
        } else {
            None
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::S(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::S(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Int(value)
    }
}

/// Replaces every decimal value in `item` with the equivalent host integer and
/// returns the same map.
///
/// Decimals with a fractional part, or outside the `i64` range, are left as
/// they are.
pub fn normalize_item(mut item: Item) -> Item {
    for value in item.values_mut() {
        if let AttributeValue::N(decimal) = value {
            if let Some(int) = decimal.as_i64_exact() {
                *value = AttributeValue::Int(int);
            }
        }
    }
    item
}

pub fn item_to_json(item: &Item) -> JsonValue {
    JsonValue::Object(
        item.iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect(),
    )
}

pub fn item_from_json(value: &JsonValue) -> Result<Item> {
    let object = value
        .as_object()
        .ok_or_else(|| StorageError::InvalidArg("item must be a JSON object".to_string()))?;
    object
        .iter()
        .map(|(name, value)| Ok((name.clone(), AttributeValue::from_json(value)?)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn decimal(text: &str) -> AttributeValue {
        AttributeValue::N(BigDecimal::from_str(text).unwrap())
    }

    #[test]
    fn normalizes_whole_decimals_only() {
        let mut item = Item::new();
        item.insert("points".into(), decimal("10"));
        item.insert("ratio".into(), decimal("0.5"));
        item.insert("email".into(), "a@x.com".into());
        item.insert("active".into(), AttributeValue::Bool(true));

        let item = normalize_item(item);
        assert_eq!(item["points"], AttributeValue::Int(10));
        assert_eq!(item["ratio"], decimal("0.5"));
        assert_eq!(item["email"], AttributeValue::S("a@x.com".into()));
        assert_eq!(item["active"], AttributeValue::Bool(true));
    }

    #[test]
    fn key_text_matches_across_numeric_forms() {
        assert_eq!(AttributeValue::Int(10).key_text(), decimal("10").key_text());
        assert_eq!(AttributeValue::Int(10).key_text(), decimal("10.00").key_text());
    }

    #[test]
    fn json_conversion_rejects_nested_values() {
        let err = item_from_json(&json!({"tags": ["a"]})).unwrap_err();
        assert!(matches!(err, StorageError::InvalidArg(_)));

        let item = item_from_json(&json!({"card_number": "abc", "points": 3})).unwrap();
        assert_eq!(item["points"], decimal("3"));
        assert_eq!(item_to_json(&item), json!({"card_number": "abc", "points": 3}));
    }
}
