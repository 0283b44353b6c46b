//! # Location Identifier Model
//!
//! The domain entity the synchronizer reconciles, together with the rules that
//! make an identifier well formed. Values are validated once, at construction;
//! a `LocationIdentifier` that exists is always valid.
//!
//! ## Rules
//! - `lac` and `cellid` must lie strictly between `0` and `0xFFFF`.
//! - `eci` must lie strictly between `0` and `0xFFFFFFF`.
//! - An unset field is always in range.
//! - The accepted shapes are `lac`, `lac + cellid` and `eci`. Everything else
//!   (for example `eci + lac`, `cellid` alone, or nothing at all) is rejected.
//!
//! Range checks run first, so a record with an out-of-range field is reported
//! as out of range even when its shape is also wrong.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Exclusive upper bound of `lac`.
pub const LAC_MAX: i64 = 0xFFFF;
/// Exclusive upper bound of `cellid`.
pub const CELLID_MAX: i64 = 0xFFFF;
/// Exclusive upper bound of `eci`.
pub const ECI_MAX: i64 = 0xFFF_FFFF;

/// Why a raw record could not become a `LocationIdentifier`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("'{field}' value {value} is outside the open interval (0, {max})")]
    OutOfRange {
        field: &'static str,
        value: i64,
        max: i64,
    },

    #[error("'eci' cannot be combined with 'lac' or 'cellid'")]
    EciCombined,

    #[error("valid combinations are 'lac', 'lac + cellid' or 'eci'")]
    MissingPrimary,

    #[error("'{field}' must be an integer or null, found {found}")]
    Malformed {
        field: &'static str,
        found: &'static str,
    },

    #[error("a record must be a JSON object, found {found}")]
    NotAnObject { found: &'static str },
}

/// # Raw Location Record
///
/// One element of the upstream payload, before validation. A missing key and an
/// explicit `null` both mean "unset"; unknown keys are ignored.
///
/// Decoding an element never fails. An element that is not an object, or whose
/// fields are not integers, decodes into a record carrying the reason in
/// `malformed`, and that record is rejected at validation like any other.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RawLocationRecord {
    pub lac: Option<i64>,
    pub cellid: Option<i64>,
    pub eci: Option<i64>,
    #[serde(skip)]
    pub malformed: Option<ValidationError>,
}

impl RawLocationRecord {
    pub fn new(lac: Option<i64>, cellid: Option<i64>, eci: Option<i64>) -> Self {
        Self {
            lac,
            cellid,
            eci,
            malformed: None,
        }
    }

    fn malformed(error: ValidationError) -> Self {
        Self {
            malformed: Some(error),
            ..Self::default()
        }
    }

    /// Reads one upstream element. Fields are checked in the order `lac`,
    /// `cellid`, `eci` and the first bad one is reported.
    pub fn from_json(value: &Value) -> Self {
        let Value::Object(map) = value else {
            return Self::malformed(ValidationError::NotAnObject {
                found: json_kind(value),
            });
        };
        let field = |name: &'static str| match map.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v.as_i64().map(Some).ok_or(ValidationError::Malformed {
                field: name,
                found: json_kind(v),
            }),
        };

        match (field("lac"), field("cellid"), field("eci")) {
            (Ok(lac), Ok(cellid), Ok(eci)) => Self::new(lac, cellid, eci),
            (Err(error), _, _) | (_, Err(error), _) | (_, _, Err(error)) => {
                Self::malformed(error)
            }
        }
    }
}

impl<'de> Deserialize<'de> for RawLocationRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Value::deserialize(deserializer).map(|value| Self::from_json(&value))
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(n) if n.is_f64() => "a floating-point number",
        Value::Number(n) if n.as_i64().is_none() => "an integer outside the 64-bit range",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// The `(lac, cellid, eci)` triple two identifiers are compared by. The store
/// key never takes part in identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityTriple {
    pub lac: Option<u32>,
    pub cellid: Option<u32>,
    pub eci: Option<u32>,
}

/// # Location Identifier
///
/// A validated cell-tower location identifier. `id` is the store's surrogate
/// key and is only present on identifiers read back from (or written to) the
/// store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LocationIdentifier {
    id: Option<i32>,
    lac: Option<u32>,
    cellid: Option<u32>,
    eci: Option<u32>,
}

impl LocationIdentifier {
    /// Validates the three raw values and builds an identifier without a key.
    ///
    /// # Errors
    /// `ValidationError::OutOfRange` for the first field outside its interval
    /// (checked in the order `lac`, `cellid`, `eci`), otherwise a combination
    /// error if the set fields do not form an accepted shape.
    pub fn new(
        lac: Option<i64>,
        cellid: Option<i64>,
        eci: Option<i64>,
    ) -> Result<Self, ValidationError> {
        let lac = check_range("lac", lac, LAC_MAX)?;
        let cellid = check_range("cellid", cellid, CELLID_MAX)?;
        let eci = check_range("eci", eci, ECI_MAX)?;

        match (lac, cellid, eci) {
            (_, _, Some(_)) if lac.is_some() || cellid.is_some() => {
                Err(ValidationError::EciCombined)
            }
            (None, _, None) => Err(ValidationError::MissingPrimary),
            _ => Ok(Self {
                id: None,
                lac,
                cellid,
                eci,
            }),
        }
    }

    /// Returns a copy carrying the given store key.
    pub fn with_id(self, id: i32) -> Self {
        Self {
            id: Some(id),
            ..self
        }
    }

    /// Returns a copy without a store key.
    pub fn without_id(self) -> Self {
        Self { id: None, ..self }
    }

    pub fn id(&self) -> Option<i32> {
        self.id
    }

    pub fn lac(&self) -> Option<u32> {
        self.lac
    }

    pub fn cellid(&self) -> Option<u32> {
        self.cellid
    }

    pub fn eci(&self) -> Option<u32> {
        self.eci
    }

    /// The identity used for diffing.
    pub fn identity(&self) -> IdentityTriple {
        IdentityTriple {
            lac: self.lac,
            cellid: self.cellid,
            eci: self.eci,
        }
    }
}

impl TryFrom<RawLocationRecord> for LocationIdentifier {
    type Error = ValidationError;

    fn try_from(raw: RawLocationRecord) -> Result<Self, Self::Error> {
        if let Some(error) = raw.malformed {
            return Err(error);
        }
        Self::new(raw.lac, raw.cellid, raw.eci)
    }
}

impl fmt::Display for LocationIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn show(v: Option<impl fmt::Display>) -> String {
            v.map_or_else(|| "-".to_string(), |v| v.to_string())
        }
        write!(
            f,
            "id={} lac={} cellid={} eci={}",
            show(self.id),
            show(self.lac),
            show(self.cellid),
            show(self.eci)
        )
    }
}

fn check_range(
    field: &'static str,
    value: Option<i64>,
    max: i64,
) -> Result<Option<u32>, ValidationError> {
    match value {
        None => Ok(None),
        // `max` never exceeds u32::MAX, so the cast below is lossless.
        Some(v) if v > 0 && v < max => Ok(Some(v as u32)),
        Some(v) => Err(ValidationError::OutOfRange {
            field,
            value: v,
            max,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lac(v: i64) -> Result<LocationIdentifier, ValidationError> {
        LocationIdentifier::new(Some(v), None, None)
    }

    #[test]
    fn lac_bounds_are_exclusive() {
        assert!(lac(0).is_err());
        assert!(lac(LAC_MAX).is_err());
        assert!(lac(-1).is_err());
        assert!(lac(1).is_ok());
        assert!(lac(65534).is_ok());
    }

    #[test]
    fn cellid_bounds_are_exclusive() {
        let cell = |v| LocationIdentifier::new(Some(10), Some(v), None);
        assert_eq!(
            cell(0),
            Err(ValidationError::OutOfRange {
                field: "cellid",
                value: 0,
                max: CELLID_MAX
            })
        );
        assert!(cell(65535).is_err());
        assert!(cell(1).is_ok());
        assert!(cell(65534).is_ok());
    }

    #[test]
    fn eci_bounds_are_exclusive() {
        let eci = |v| LocationIdentifier::new(None, None, Some(v));
        assert!(eci(0).is_err());
        assert!(eci(268_435_455).is_err());
        assert!(eci(1).is_ok());
        assert!(eci(268_435_454).is_ok());
    }

    #[test]
    fn accepted_shapes() {
        assert!(LocationIdentifier::new(Some(1), None, None).is_ok());
        assert!(LocationIdentifier::new(Some(1), Some(2), None).is_ok());
        assert!(LocationIdentifier::new(None, None, Some(3)).is_ok());
    }

    #[test]
    fn rejected_shapes() {
        assert_eq!(
            LocationIdentifier::new(Some(1), None, Some(3)),
            Err(ValidationError::EciCombined)
        );
        assert_eq!(
            LocationIdentifier::new(None, Some(2), Some(3)),
            Err(ValidationError::EciCombined)
        );
        assert_eq!(
            LocationIdentifier::new(None, None, None),
            Err(ValidationError::MissingPrimary)
        );
        assert_eq!(
            LocationIdentifier::new(None, Some(2), None),
            Err(ValidationError::MissingPrimary)
        );
    }

    #[test]
    fn range_is_checked_before_combination() {
        // Both out of range and an invalid shape: the range error wins.
        assert!(matches!(
            LocationIdentifier::new(Some(0), None, Some(5)),
            Err(ValidationError::OutOfRange { field: "lac", .. })
        ));
    }

    #[test]
    fn identity_ignores_the_key() {
        let a = LocationIdentifier::new(Some(1), Some(2), None).unwrap();
        let b = a.with_id(42);
        assert_ne!(a, b);
        assert_eq!(a.identity(), b.identity());
        assert_eq!(b.without_id(), a);
    }

    #[test]
    fn raw_record_decodes_missing_and_null_as_unset() {
        let raw: Vec<RawLocationRecord> =
            serde_json::from_str(r#"[{"lac": 5, "cellid": null}, {"eci": 9}]"#).unwrap();
        assert_eq!(raw[0], RawLocationRecord::new(Some(5), None, None));
        assert_eq!(raw[1], RawLocationRecord::new(None, None, Some(9)));
        assert!(LocationIdentifier::try_from(raw[0]).is_ok());
    }

    #[test]
    fn malformed_elements_decode_without_failing_the_payload() {
        let raw: Vec<RawLocationRecord> = serde_json::from_str(
            r#"[
                {"lac": 1, "cellid": 2, "extra": "ignored"},
                {"lac": 1.5},
                {"lac": 3, "cellid": "12"},
                {"eci": 18446744073709551615},
                42,
                {"eci": 100}
            ]"#,
        )
        .unwrap();
        assert_eq!(raw.len(), 6);

        assert_eq!(raw[0], RawLocationRecord::new(Some(1), Some(2), None));
        assert_eq!(
            LocationIdentifier::try_from(raw[1]),
            Err(ValidationError::Malformed {
                field: "lac",
                found: "a floating-point number"
            })
        );
        assert!(matches!(
            LocationIdentifier::try_from(raw[2]),
            Err(ValidationError::Malformed {
                field: "cellid",
                found: "a string"
            })
        ));
        assert!(matches!(
            LocationIdentifier::try_from(raw[3]),
            Err(ValidationError::Malformed { field: "eci", .. })
        ));
        assert_eq!(
            LocationIdentifier::try_from(raw[4]),
            Err(ValidationError::NotAnObject { found: "a number" })
        );
        assert!(LocationIdentifier::try_from(raw[5]).is_ok());
    }

    #[test]
    fn first_bad_field_is_reported() {
        let raw = RawLocationRecord::from_json(&serde_json::json!({
            "lac": true,
            "cellid": [1],
        }));
        assert_eq!(
            raw.malformed,
            Some(ValidationError::Malformed {
                field: "lac",
                found: "a boolean"
            })
        );
        assert_eq!(raw.lac, None);
    }
}
