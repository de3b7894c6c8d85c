//! Shaping of the structured payload fields: the `meta` mapping, the owner
//! allocation split, the product list and the owner set, plus the
//! direction/status normalizations. Shaped blobs are the only JSON that ever
//! reaches the store, and each one is held under its serialized-size
//! ceiling.

use {
    crate::{error::Error, sanitize},
    regex::Regex,
    serde_json::{Map, Value},
    std::{str::FromStr, sync::LazyLock},
};

pub const META_MAX_BYTES: usize = 4096;
pub const ALLOCATIONS_MAX_BYTES: usize = 8192;
pub const PRODUCTS_MAX_BYTES: usize = 16384;

static META_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("valid regex"));

/// The business classification of a transaction.
#[derive(Clone, Copy, Debug, Eq, PartialEq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Purchase,
    Refund,
    Chargeback,
    Payout,
    Adjustment,
}

/// Trims, lowercases and parses a direction token.
pub fn normalize_direction(raw: &str) -> Result<Direction, Error> {
    Direction::from_str(raw.trim().to_lowercase().as_str()).map_err(|_| Error::InvalidDirection)
}

/// Status is an open string, but always trimmed, lowercased and non-empty.
pub fn normalize_status(raw: &str) -> Result<String, Error> {
    let status = raw.trim().to_lowercase();
    if status.is_empty() {
        return Err(Error::InvalidStatus);
    }
    Ok(status)
}

/// Shapes the `meta` mapping: scrub to a fresh map, enforce the key pattern
/// recursively, drop absent entries, and cap the serialized size. Absent or
/// `null` input means "no meta".
pub fn shape_meta(value: Option<&Value>) -> Result<Option<Value>, Error> {
    let Some(value) = value else { return Ok(None) };
    if value.is_null() {
        return Ok(None);
    }
    let map = sanitize::sanitize_object(value)
        .ok_or_else(|| Error::invalid_value("meta", "an object"))?;
    let shaped = Value::Object(shape_meta_map(&map, "meta")?);
    if shaped.to_string().len() > META_MAX_BYTES {
        return Err(Error::BlobTooLarge {
            field: "meta",
            limit: META_MAX_BYTES,
        });
    }
    Ok(Some(shaped))
}

fn shape_meta_map(map: &Map<String, Value>, path: &str) -> Result<Map<String, Value>, Error> {
    let mut shaped = Map::new();
    for (key, value) in map {
        let entry_path = format!("{path}.{key}");
        let clean_key = sanitize::sanitize_text(&Value::String(key.clone()))
            .filter(|clean| META_KEY.is_match(clean))
            .ok_or_else(|| Error::InvalidMetaKey(entry_path.clone()))?;
        if let Some(entry) = shape_meta_entry(value, &entry_path)? {
            shaped.insert(clean_key, entry);
        }
    }
    Ok(shaped)
}

fn shape_meta_entry(value: &Value, path: &str) -> Result<Option<Value>, Error> {
    match value {
        Value::String(_) | Value::Number(_) | Value::Bool(_) => Ok(Some(value.clone())),
        Value::Null => Ok(None),
        Value::Array(entries) => {
            let mut shaped = Vec::with_capacity(entries.len());
            for entry in entries {
                if !sanitize::has_value(entry) {
                    continue;
                }
                if let Some(entry) = shape_meta_entry(entry, path)? {
                    shaped.push(entry);
                }
            }
            Ok(Some(Value::Array(shaped)))
        }
        Value::Object(_) => {
            let scrubbed = sanitize::sanitize_object(value)
                .ok_or_else(|| Error::invalid_value("meta", "an object"))?;
            Ok(Some(Value::Object(shape_meta_map(&scrubbed, path)?)))
        }
    }
}

/// One entry of the owner split.
#[derive(Clone, Debug, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Allocation {
    pub owner_uuid: String,
    pub amount_cents: i64,
}

/// Shapes `owner_allocations`: every element must carry a non-empty owner id
/// and an integer amount.
pub fn shape_allocations(value: &Value) -> Result<Vec<Allocation>, Error> {
    let entries = value
        .as_array()
        .ok_or_else(|| Error::invalid_value("owner_allocations", "an array"))?;
    let mut allocations = Vec::with_capacity(entries.len());
    for (index, entry) in entries.iter().enumerate() {
        let parsed = entry.as_object().and_then(|map| {
            let owner_uuid = map.get("owner_uuid").and_then(sanitize::sanitize_text)?;
            let amount_cents = map.get("amount_cents").and_then(sanitize::sanitize_int)?;
            Some(Allocation {
                owner_uuid,
                amount_cents,
            })
        });
        allocations.push(parsed.ok_or(Error::InvalidAllocation(index))?);
    }
    let encoded = serde_json::to_value(&allocations)
        .map_err(|_| Error::invalid_value("owner_allocations", "serializable entries"))?;
    if encoded.to_string().len() > ALLOCATIONS_MAX_BYTES {
        return Err(Error::BlobTooLarge {
            field: "owner_allocations",
            limit: ALLOCATIONS_MAX_BYTES,
        });
    }
    Ok(allocations)
}

/// The JSONB form of a shaped allocation list.
pub fn allocations_json(allocations: &[Allocation]) -> Value {
    serde_json::to_value(allocations).unwrap_or_else(|_| Value::Array(Vec::new()))
}

/// Shapes `products`: any JSON sequence under the size ceiling.
pub fn shape_products(value: &Value) -> Result<Value, Error> {
    if !value.is_array() {
        return Err(Error::invalid_value("products", "an array"));
    }
    if value.to_string().len() > PRODUCTS_MAX_BYTES {
        return Err(Error::BlobTooLarge {
            field: "products",
            limit: PRODUCTS_MAX_BYTES,
        });
    }
    Ok(value.clone())
}

/// Shapes `owners`: a non-empty sequence of non-empty strings.
pub fn shape_owners(value: &Value) -> Result<Value, Error> {
    let entries = value
        .as_array()
        .ok_or_else(|| Error::invalid_value("owners", "a non-empty array of strings"))?;
    let mut owners = Vec::with_capacity(entries.len());
    for entry in entries {
        let owner = sanitize::sanitize_text(entry)
            .ok_or_else(|| Error::invalid_value("owners", "a non-empty array of strings"))?;
        owners.push(Value::String(owner));
    }
    if owners.is_empty() {
        return Err(Error::invalid_value("owners", "a non-empty array of strings"));
    }
    Ok(Value::Array(owners))
}

#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    #[test]
    fn directions_parse_under_normalization() {
        assert_eq!(normalize_direction(" Purchase ").unwrap(), Direction::Purchase);
        assert_eq!(normalize_direction("REFUND").unwrap(), Direction::Refund);
        assert_eq!(normalize_direction("chargeback").unwrap(), Direction::Chargeback);
        assert_eq!(normalize_direction("payout").unwrap(), Direction::Payout);
        assert_eq!(normalize_direction("adjustment").unwrap(), Direction::Adjustment);
        assert!(matches!(
            normalize_direction("invalid"),
            Err(Error::InvalidDirection)
        ));
        assert_eq!(Direction::Purchase.to_string(), "purchase");
    }

    #[test]
    fn status_lowercases_and_requires_content() {
        assert_eq!(normalize_status(" PENDING ").unwrap(), "pending");
        assert!(matches!(normalize_status("   "), Err(Error::InvalidStatus)));
    }

    #[test]
    fn meta_absent_and_null_mean_no_meta() {
        assert_eq!(shape_meta(None).unwrap(), None);
        assert_eq!(shape_meta(Some(&json!(null))).unwrap(), None);
    }

    #[test]
    fn meta_keeps_scalars_and_recurses() {
        let shaped = shape_meta(Some(&json!({
            "plan": "pro",
            "retries": 3,
            "flags": {"beta": true, "dropped": null},
            "tags": ["a", "", null, "b"],
            "gone": null
        })))
        .unwrap()
        .unwrap();
        assert_eq!(
            shaped,
            json!({
                "plan": "pro",
                "retries": 3,
                "flags": {"beta": true},
                "tags": ["a", "b"]
            })
        );
    }

    #[test]
    fn meta_rejects_bad_keys_with_their_path() {
        let err = shape_meta(Some(&json!({"outer": {"bad key": 1}}))).unwrap_err();
        assert!(matches!(err, Error::InvalidMetaKey(path) if path == "meta.outer.bad key"));

        let err = shape_meta(Some(&json!({"sp ace": 1}))).unwrap_err();
        assert!(matches!(err, Error::InvalidMetaKey(path) if path == "meta.sp ace"));
    }

    #[test]
    fn meta_enforces_the_size_ceiling() {
        let err = shape_meta(Some(&json!({"k": "x".repeat(5000)}))).unwrap_err();
        assert!(matches!(
            err,
            Error::BlobTooLarge {
                field: "meta",
                limit: META_MAX_BYTES
            }
        ));
    }

    #[test]
    fn meta_rejects_non_objects() {
        assert!(shape_meta(Some(&json!(["not", "a", "map"]))).is_err());
        assert!(shape_meta(Some(&json!("text"))).is_err());
    }

    #[test]
    fn allocations_require_owner_and_integer_amount() {
        let allocations = shape_allocations(&json!([
            {"owner_uuid": "o1", "amount_cents": 1250},
            {"owner_uuid": "o2", "amount_cents": "750"}
        ]))
        .unwrap();
        assert_eq!(
            allocations,
            vec![
                Allocation {
                    owner_uuid: "o1".to_string(),
                    amount_cents: 1250
                },
                Allocation {
                    owner_uuid: "o2".to_string(),
                    amount_cents: 750
                },
            ]
        );

        for (index, bad) in [
            json!([{"amount_cents": 1}]),
            json!([{"owner_uuid": "o1", "amount_cents": 1}, {"owner_uuid": "", "amount_cents": 1}]),
            json!([{"owner_uuid": "o1", "amount_cents": 2.5}]),
            json!([{"owner_uuid": "o1"}]),
            json!(["not a map"]),
        ]
        .iter()
        .enumerate()
        {
            let err = shape_allocations(bad).unwrap_err();
            let expected = if index == 1 { 1 } else { 0 };
            assert!(
                matches!(err, Error::InvalidAllocation(i) if i == expected),
                "case {index}"
            );
        }

        assert!(shape_allocations(&json!("nope")).is_err());
    }

    #[test]
    fn allocations_enforce_the_size_ceiling() {
        let entries: Vec<_> = (0..200)
            .map(|i| json!({"owner_uuid": format!("owner-{i}-{}", "x".repeat(40)), "amount_cents": i}))
            .collect();
        let err = shape_allocations(&Value::Array(entries)).unwrap_err();
        assert!(matches!(
            err,
            Error::BlobTooLarge {
                field: "owner_allocations",
                ..
            }
        ));
    }

    #[test]
    fn products_cap_and_shape() {
        assert_eq!(
            shape_products(&json!([{"id": "p1"}])).unwrap(),
            json!([{"id": "p1"}])
        );
        assert!(shape_products(&json!({"id": "p1"})).is_err());
        let err = shape_products(&json!([{"blob": "x".repeat(17000)}])).unwrap_err();
        assert!(matches!(
            err,
            Error::BlobTooLarge {
                field: "products",
                ..
            }
        ));
    }

    #[test]
    fn owners_must_be_non_empty_strings() {
        assert_eq!(
            shape_owners(&json!(["o1", " o2 "])).unwrap(),
            json!(["o1", "o2"])
        );
        assert!(shape_owners(&json!([])).is_err());
        assert!(shape_owners(&json!(["ok", ""])).is_err());
        assert!(shape_owners(&json!("o1")).is_err());
    }
}
