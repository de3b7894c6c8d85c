//! The closed set of parameter types the gateway binds. Carrying typed
//! options (instead of one untyped null) keeps the parameter OID the driver
//! sends correct, so a null `meta` still binds as JSONB and a null
//! `refund_reason` as text.

use {
    crate::error::Error,
    chrono::{DateTime, Utc},
};

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Bool(Option<bool>),
    Int(Option<i64>),
    Float(Option<f64>),
    Text(Option<String>),
    Timestamp(Option<DateTime<Utc>>),
    Json(Option<serde_json::Value>),
}

impl Value {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(Some(value.into()))
    }

    pub fn json(value: serde_json::Value) -> Self {
        Self::Json(Some(value))
    }

    /// Rejects values the store must never see. The enum already excludes
    /// everything non-data; what remains is the non-finite float check.
    pub fn check(values: &[Value]) -> Result<(), Error> {
        for value in values {
            if let Value::Float(Some(number)) = value {
                if !number.is_finite() {
                    return Err(Error::UnsupportedValue("non-finite number"));
                }
            }
        }
        Ok(())
    }
}

/// Binds a slice of [`Value`]s onto a `sqlx::query` or `sqlx::query_as`
/// builder in order. A macro because the two builder types share no trait.
macro_rules! bind_values {
    ($query:expr, $values:expr) => {{
        let mut query = $query;
        for value in $values {
            query = match value {
                $crate::value::Value::Bool(v) => query.bind(*v),
                $crate::value::Value::Int(v) => query.bind(*v),
                $crate::value::Value::Float(v) => query.bind(*v),
                $crate::value::Value::Text(v) => query.bind(v.clone()),
                $crate::value::Value::Timestamp(v) => query.bind(*v),
                $crate::value::Value::Json(v) => query.bind(v.clone()),
            };
        }
        query
    }};
}

pub(crate) use bind_values;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_finite_floats() {
        assert!(Value::check(&[Value::Float(Some(1.5))]).is_ok());
        assert!(Value::check(&[Value::Float(None)]).is_ok());
        assert!(Value::check(&[Value::Float(Some(f64::NAN))]).is_err());
        assert!(Value::check(&[Value::Float(Some(f64::INFINITY))]).is_err());
    }

    #[test]
    fn accepts_every_other_variant() {
        let values = [
            Value::Bool(Some(true)),
            Value::Int(None),
            Value::text("ok"),
            Value::Timestamp(Some(Utc::now())),
            Value::json(serde_json::json!({"k": [1, 2]})),
        ];
        assert!(Value::check(&values).is_ok());
    }
}
