use serde::{Deserialize, Serialize};

use crate::errors::{Result, StorageError};
use crate::utils::id::generate_card_number;
use crate::value::{AttributeValue, Item};

pub const CARD_NUMBER: &str = "card_number";
pub const FIRST_NAME: &str = "first_name";
pub const LAST_NAME: &str = "last_name";
pub const EMAIL: &str = "email";
pub const MEMBERSHIP_TIER: &str = "membership_tier";
pub const POINTS: &str = "points";

/// The persisted loyalty card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoyaltyCard {
    pub card_number: String,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_tier: Option<String>,
    pub points: i64,
}

impl LoyaltyCard {
    pub fn to_item(&self) -> Item {
        let mut item = Item::new();
        item.insert(CARD_NUMBER.into(), self.card_number.clone().into());
        item.insert(FIRST_NAME.into(), self.first_name.clone().into());
        item.insert(LAST_NAME.into(), self.last_name.clone().into());
        item.insert(EMAIL.into(), self.email.clone().into());
        if let Some(tier) = &self.membership_tier {
            item.insert(MEMBERSHIP_TIER.into(), tier.clone().into());
        }
        item.insert(POINTS.into(), AttributeValue::Int(self.points));
        item
    }

    pub fn from_item(item: &Item) -> Result<Self> {
        let text = |name: &str| {
            item.get(name)
                .and_then(AttributeValue::as_str)
                .map(str::to_string)
        };
        Ok(Self {
            card_number: text(CARD_NUMBER).ok_or_else(|| {
                StorageError::InvalidArg(format!("item is missing '{CARD_NUMBER}'"))
            })?,
            first_name: text(FIRST_NAME).unwrap_or_default(),
            last_name: text(LAST_NAME).unwrap_or_default(),
            email: text(EMAIL).unwrap_or_default(),
            membership_tier: text(MEMBERSHIP_TIER),
            points: item
                .get(POINTS)
                .and_then(AttributeValue::as_i64)
                .unwrap_or_default(),
        })
    }
}

/// Points as they arrive from callers: a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PointsValue {
    Integer(i64),
    Float(f64),
    Text(String),
}

impl PointsValue {
    pub fn to_points(&self) -> Result<i64> {
        match self {
            PointsValue::Integer(value) => Ok(*value),
            PointsValue::Float(value) if value.fract() == 0.0 && value.is_finite() => {
                // i64::MAX as f64 rounds up to 2^63, which no i64 can hold.
                if *value < i64::MIN as f64 || *value >= i64::MAX as f64 {
                    return Err(StorageError::InvalidArg(format!(
                        "points out of range, got {value}"
                    )));
                }
                Ok(*value as i64)
            }
            PointsValue::Float(value) => Err(StorageError::InvalidArg(format!(
                "points must be a whole number, got {value}"
            ))),
            PointsValue::Text(text) => parse_points(text),
        }
    }
}

/// Parses a points cell; an empty value means zero.
pub fn parse_points(text: &str) -> Result<i64> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    trimmed
        .parse::<i64>()
        .map_err(|_| StorageError::InvalidArg(format!("points must be an integer, got '{trimmed}'")))
}

/// A loyalty card as submitted by a caller or carried in a queue message.
/// Every field is optional until [`CardPayload::into_card`] validates it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CardPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub membership_tier: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub points: Option<PointsValue>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

impl CardPayload {
    /// Validates the payload into a card. A missing card number is generated;
    /// missing points default to zero; the email is required.
    pub fn into_card(self) -> Result<LoyaltyCard> {
        let email = non_empty(self.email)
            .ok_or_else(|| StorageError::InvalidArg("email is required".to_string()))?;
        let points = match &self.points {
            Some(points) => points.to_points()?,
            None => 0,
        };
        Ok(LoyaltyCard {
            card_number: non_empty(self.card_number).unwrap_or_else(generate_card_number),
            first_name: self.first_name.unwrap_or_default(),
            last_name: self.last_name.unwrap_or_default(),
            email,
            membership_tier: non_empty(self.membership_tier),
            points,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_points_become_integers() {
        let payload: CardPayload =
            serde_json::from_value(json!({"card_number": "abc123", "email": "a@x.com", "points": "10"}))
                .unwrap();
        let card = payload.into_card().unwrap();
        assert_eq!(card.card_number, "abc123");
        assert_eq!(card.points, 10);
        assert_eq!(card.membership_tier, None);
    }

    #[test]
    fn missing_points_and_card_number_get_defaults() {
        let payload: CardPayload = serde_json::from_value(json!({"email": "b@x.com", "points": null}))
            .unwrap();
        let card = payload.into_card().unwrap();
        assert_eq!(card.points, 0);
        assert_eq!(card.card_number.len(), crate::utils::id::CARD_NUMBER_LEN);
    }

    #[test]
    fn rejects_missing_email_and_bad_points() {
        let no_email = CardPayload::default().into_card().unwrap_err();
        assert!(no_email.to_string().contains("email is required"));

        let bad_points = CardPayload {
            email: Some("c@x.com".into()),
            points: Some(PointsValue::Text("ten".into())),
            ..Default::default()
        };
        assert!(matches!(bad_points.into_card(), Err(StorageError::InvalidArg(_))));
    }

    #[test]
    fn rejects_points_outside_the_integer_range() {
        for points in [json!(10_000_000_000_000_000_000u64), json!(1e300), json!(-1e19)] {
            let payload: CardPayload =
                serde_json::from_value(json!({"email": "d@x.com", "points": points})).unwrap();
            let err = payload.into_card().unwrap_err();
            assert!(err.to_string().contains("out of range"), "{err}");
        }

        let largest_float_below_max: CardPayload =
            serde_json::from_value(json!({"email": "d@x.com", "points": 9.0e18})).unwrap();
        assert_eq!(largest_float_below_max.into_card().unwrap().points, 9_000_000_000_000_000_000);
    }

    #[test]
    fn item_round_trip_keeps_optional_tier_absent() {
        let card = LoyaltyCard {
            card_number: "abc".into(),
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            email: "ada@x.com".into(),
            membership_tier: None,
            points: 42,
        };
        let item = card.to_item();
        assert!(!item.contains_key(MEMBERSHIP_TIER));
        assert_eq!(LoyaltyCard::from_item(&item).unwrap(), card);
    }
}
