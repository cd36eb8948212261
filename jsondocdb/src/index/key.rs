use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use std::fmt;

/// An index key. Only strings, numbers and booleans can be keys.
///
/// SQLite has no boolean storage class, so `Bool` keys are stored as the
/// integers 0 and 1 next to a flag that restores them on the way out. A
/// boolean key and the number it is stored as are the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Number(Number),
    String(String),
}

impl Scalar {
    /// The scalar view of a JSON value, or `None` for null, arrays and objects.
    pub fn from_value(value: &Value) -> Option<Scalar> {
        match value {
            Value::Bool(b) => Some(Scalar::Bool(*b)),
            Value::Number(n) => Some(Scalar::Number(n.clone())),
            Value::String(s) => Some(Scalar::String(s.clone())),
            Value::Null | Value::Array(_) | Value::Object(_) => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Number(n) => Value::Number(n.clone()),
            Scalar::String(s) => Value::String(s.clone()),
        }
    }

    /// The value SQLite compares this key by: booleans as 0/1 and integral
    /// floats as integers.
    pub fn stored(&self) -> Scalar {
        match self {
            Scalar::Bool(b) => Scalar::Number(i64::from(*b).into()),
            Scalar::Number(n) if !n.is_i64() && !n.is_u64() => match n.as_f64() {
                Some(f) if f.fract() == 0.0 && f.abs() < 9.2e18 => {
                    Scalar::Number((f as i64).into())
                }
                _ => self.clone(),
            },
            _ => self.clone(),
        }
    }

    /// Whether two keys land on the same index entry.
    pub fn same_key(&self, other: &Scalar) -> bool {
        self.stored() == other.stored()
    }

    /// Turn a key read back from SQLite into a boolean again when it was
    /// stored as one.
    pub(crate) fn restore(self, boolean: bool) -> Scalar {
        if !boolean {
            return self;
        }
        let stored = match &self {
            Scalar::Number(n) => n.as_i64(),
            _ => None,
        };
        match stored {
            Some(i) => Scalar::Bool(i != 0),
            None => self,
        }
    }

    /// Parse a key typed on a command line: integers and floats become
    /// numbers, `true`/`false` booleans, anything else a string.
    pub fn parse_lenient(text: &str) -> Scalar {
        if let Ok(i) = text.parse::<i64>() {
            return Scalar::Number(i.into());
        }
        if let Some(n) = text.parse::<f64>().ok().and_then(Number::from_f64) {
            return Scalar::Number(n);
        }
        match text {
            "true" => Scalar::Bool(true),
            "false" => Scalar::Bool(false),
            _ => Scalar::String(text.to_string()),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_value())
    }
}

impl From<&str> for Scalar {
    fn from(s: &str) -> Self {
        Scalar::String(s.to_string())
    }
}

impl From<String> for Scalar {
    fn from(s: String) -> Self {
        Scalar::String(s)
    }
}

impl From<i64> for Scalar {
    fn from(i: i64) -> Self {
        Scalar::Number(i.into())
    }
}

impl From<bool> for Scalar {
    fn from(b: bool) -> Self {
        Scalar::Bool(b)
    }
}

impl ToSql for Scalar {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as SqlValue;

        let value = match self {
            Scalar::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Scalar::String(s) => return Ok(ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes()))),
            Scalar::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => SqlValue::Real(n.as_f64().unwrap_or(f64::NAN)),
            },
        };
        Ok(ToSqlOutput::Owned(value))
    }
}

impl FromSql for Scalar {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Integer(i) => Ok(Scalar::Number(i.into())),
            ValueRef::Real(f) => Number::from_f64(f)
                .map(Scalar::Number)
                .ok_or(FromSqlError::InvalidType),
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map(|s| Scalar::String(s.to_string()))
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            ValueRef::Null | ValueRef::Blob(_) => Err(FromSqlError::InvalidType),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_value_accepts_only_scalars() {
        assert_eq!(Scalar::from_value(&json!("a")), Some(Scalar::from("a")));
        assert_eq!(Scalar::from_value(&json!(3)), Some(Scalar::from(3i64)));
        assert_eq!(Scalar::from_value(&json!(true)), Some(Scalar::Bool(true)));
        assert_eq!(Scalar::from_value(&json!(null)), None);
        assert_eq!(Scalar::from_value(&json!([1])), None);
        assert_eq!(Scalar::from_value(&json!({"a": 1})), None);
    }

    #[test]
    fn test_parse_lenient() {
        assert_eq!(Scalar::parse_lenient("42"), Scalar::from(42i64));
        assert_eq!(Scalar::parse_lenient("2.5"), Scalar::Number(Number::from_f64(2.5).unwrap()));
        assert_eq!(Scalar::parse_lenient("true"), Scalar::Bool(true));
        assert_eq!(Scalar::parse_lenient("id3"), Scalar::from("id3"));
    }

    #[test]
    fn test_serializes_untagged() {
        assert_eq!(serde_json::to_value(Scalar::from("k")).unwrap(), json!("k"));
        assert_eq!(serde_json::to_value(Scalar::from(7i64)).unwrap(), json!(7));
        let parsed: Scalar = serde_json::from_value(json!(false)).unwrap();
        assert_eq!(parsed, Scalar::Bool(false));
    }

    #[test]
    fn test_same_key_follows_sqlite_comparison() {
        let one = Scalar::from(1i64);
        let one_float = Scalar::Number(Number::from_f64(1.0).unwrap());

        assert!(one.same_key(&one_float));
        assert!(one.same_key(&Scalar::Bool(true)));
        assert!(Scalar::Bool(false).same_key(&Scalar::from(0i64)));
        assert!(!one.same_key(&Scalar::from("1")));
        assert!(!one.same_key(&Scalar::Number(Number::from_f64(1.5).unwrap())));
        assert_eq!(one_float.stored(), one);
    }

    #[test]
    fn test_restore_only_flagged_keys() {
        assert_eq!(Scalar::from(1i64).restore(true), Scalar::Bool(true));
        assert_eq!(Scalar::from(0i64).restore(true), Scalar::Bool(false));
        assert_eq!(Scalar::from(1i64).restore(false), Scalar::from(1i64));
        assert_eq!(Scalar::from("x").restore(true), Scalar::from("x"));
    }

    #[test]
    fn test_sqlite_round_trip_turns_bool_into_number() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let back: Scalar = conn
            .query_row("SELECT ?1", [Scalar::Bool(true)], |row| row.get(0))
            .unwrap();
        assert_eq!(back, Scalar::from(1i64));

        let back: Scalar = conn
            .query_row("SELECT ?1", [Scalar::from("text")], |row| row.get(0))
            .unwrap();
        assert_eq!(back, Scalar::from("text"));
    }
}
