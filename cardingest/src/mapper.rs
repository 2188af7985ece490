use cardstore::models::{parse_points, CardPayload, PointsValue};
use csv::StringRecord;

use crate::error::{IngestError, Result};
use crate::schema::{CardField, ColumnMapping};

/// Builds a queue payload from one positional row.
///
/// Columns past the end of a short row read as empty. Empty text cells are
/// left out of the payload, and an empty points cell becomes zero.
pub fn row_to_payload(mapping: &ColumnMapping, row: &StringRecord) -> Result<CardPayload> {
    let mut payload = CardPayload::default();
    for (position, field) in mapping.fields().iter().enumerate() {
        let cell = row.get(position).unwrap_or("").trim();
        let text = (!cell.is_empty()).then(|| cell.to_string());
        match field {
            CardField::CardNumber => payload.card_number = text,
            CardField::FirstName => payload.first_name = text,
            CardField::LastName => payload.last_name = text,
            CardField::Email => payload.email = text,
            CardField::MembershipTier => payload.membership_tier = text,
            CardField::Points => {
                let points = parse_points(cell).map_err(|err| IngestError::Mapping(err.to_string()))?;
                payload.points = Some(PointsValue::Integer(points));
            }
            CardField::Ignore => {}
        }
    }
    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_full_row() {
        let row = StringRecord::from(vec!["abc", "Ada", "Lovelace", "ada@x.com", "gold", "12"]);
        let payload = row_to_payload(&ColumnMapping::default(), &row).unwrap();
        assert_eq!(payload.card_number.as_deref(), Some("abc"));
        assert_eq!(payload.membership_tier.as_deref(), Some("gold"));
        assert_eq!(payload.points, Some(PointsValue::Integer(12)));
    }

    #[test]
    fn short_row_and_empty_points_default() {
        let row = StringRecord::from(vec!["", "Bo", "", "bo@x.com"]);
        let payload = row_to_payload(&ColumnMapping::default(), &row).unwrap();
        assert_eq!(payload.card_number, None);
        assert_eq!(payload.last_name, None);
        assert_eq!(payload.points, Some(PointsValue::Integer(0)));
    }

    #[test]
    fn unparsable_points_fail_the_row() {
        let row = StringRecord::from(vec!["a", "b", "c", "d@x.com", "", "lots"]);
        let err = row_to_payload(&ColumnMapping::default(), &row).unwrap_err();
        assert!(matches!(err, IngestError::Mapping(_)));
    }
}
