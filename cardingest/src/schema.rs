use std::fmt;
use std::str::FromStr;

use cardstore::models;
use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// A card attribute a delimited column can feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardField {
    CardNumber,
    FirstName,
    LastName,
    Email,
    MembershipTier,
    Points,
    /// Column present in the file but not mapped to any attribute.
    Ignore,
}

impl CardField {
    pub fn as_str(&self) -> &'static str {
        match self {
            CardField::CardNumber => models::CARD_NUMBER,
            CardField::FirstName => models::FIRST_NAME,
            CardField::LastName => models::LAST_NAME,
            CardField::Email => models::EMAIL,
            CardField::MembershipTier => models::MEMBERSHIP_TIER,
            CardField::Points => models::POINTS,
            CardField::Ignore => "ignore",
        }
    }
}

impl fmt::Display for CardField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CardField {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "card_number" => Ok(CardField::CardNumber),
            "first_name" => Ok(CardField::FirstName),
            "last_name" => Ok(CardField::LastName),
            "email" => Ok(CardField::Email),
            "membership_tier" => Ok(CardField::MembershipTier),
            "points" => Ok(CardField::Points),
            "ignore" | "_" | "" => Ok(CardField::Ignore),
            other => Err(IngestError::Mapping(format!("unknown column '{other}'"))),
        }
    }
}

/// Positional column layout shared by every delimited-file entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ColumnMapping(Vec<CardField>);

impl Default for ColumnMapping {
    fn default() -> Self {
        Self(vec![
            CardField::CardNumber,
            CardField::FirstName,
            CardField::LastName,
            CardField::Email,
            CardField::MembershipTier,
            CardField::Points,
        ])
    }
}

impl ColumnMapping {
    pub fn new(fields: Vec<CardField>) -> Result<Self, IngestError> {
        let mut seen = Vec::with_capacity(fields.len());
        for field in fields.iter().filter(|field| **field != CardField::Ignore) {
            if seen.contains(field) {
                return Err(IngestError::Mapping(format!(
                    "column '{field}' is mapped more than once"
                )));
            }
            seen.push(*field);
        }
        if !seen.contains(&CardField::Email) {
            return Err(IngestError::Mapping(
                "column mapping must include 'email'".to_string(),
            ));
        }
        Ok(Self(fields))
    }

    pub fn fields(&self) -> &[CardField] {
        &self.0
    }

    pub fn position_of(&self, field: CardField) -> Option<usize> {
        self.0.iter().position(|candidate| *candidate == field)
    }
}

impl FromStr for ColumnMapping {
    type Err = IngestError;

    /// Parses a comma-separated field list such as
    /// `card_number,first_name,last_name,email,ignore,points`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields = s
            .split(',')
            .map(CardField::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(fields)
    }
}

impl fmt::Display for ColumnMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.0.iter().map(CardField::as_str).collect();
        f.write_str(&names.join(","))
    }
}
