//! Dimension column values

use serde::{Deserialize, Serialize};
use std::fmt;

/// A value observed in a dimension column of the fact data.
///
/// `Null` is a distinguished key: fact rows whose column is SQL NULL are
/// grouped under it rather than dropped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
}

impl ColumnValue {
    /// Returns true for the distinguished null key.
    pub fn is_null(&self) -> bool {
        matches!(self, ColumnValue::Null)
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnValue::Null => f.write_str("#null"),
            ColumnValue::Bool(b) => write!(f, "{}", b),
            ColumnValue::Int(i) => write!(f, "{}", i),
            ColumnValue::Text(s) => write!(f, "'{}'", s),
        }
    }
}

impl From<&str> for ColumnValue {
    fn from(value: &str) -> Self {
        ColumnValue::Text(value.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(value: String) -> Self {
        ColumnValue::Text(value)
    }
}

impl From<i64> for ColumnValue {
    fn from(value: i64) -> Self {
        ColumnValue::Int(value)
    }
}

impl From<i32> for ColumnValue {
    fn from(value: i32) -> Self {
        ColumnValue::Int(i64::from(value))
    }
}

impl From<bool> for ColumnValue {
    fn from(value: bool) -> Self {
        ColumnValue::Bool(value)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(ColumnValue::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_sorts_first() {
        let mut values = vec![
            ColumnValue::from("Drink"),
            ColumnValue::from(1997),
            ColumnValue::Null,
        ];
        values.sort();
        assert!(values[0].is_null());
    }

    #[test]
    fn test_option_conversion() {
        assert_eq!(ColumnValue::from(None::<i64>), ColumnValue::Null);
        assert_eq!(ColumnValue::from(Some("CA")), ColumnValue::Text("CA".into()));
    }

    #[test]
    fn test_display() {
        assert_eq!(ColumnValue::Null.to_string(), "#null");
        assert_eq!(ColumnValue::from("Drink").to_string(), "'Drink'");
        assert_eq!(ColumnValue::from(1997).to_string(), "1997");
    }
}
