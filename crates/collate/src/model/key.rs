//! Key extraction from records.
//!
//! Grouping iterators, comparators and model factories can each be given
//! either as an attribute name or as a function. [`KeySource`] holds either
//! form and exposes one extraction call for both.

use std::fmt;
use std::sync::Arc;

use super::record::Record;
use super::value::Value;
use crate::error::ConfigError;

/// A key extraction function.
pub type KeyFn = Arc<dyn Fn(&Record) -> Value + Send + Sync>;

/// Where a key comes from: a named attribute or a function of the record.
#[derive(Clone)]
pub enum KeySource {
    /// Read the named attribute.
    Attribute(String),
    /// Call the function.
    Function(KeyFn),
}

impl KeySource {
    /// Key read from an attribute.
    pub fn attribute(name: impl Into<String>) -> Self {
        KeySource::Attribute(name.into())
    }

    /// Key computed by a function.
    pub fn function<F>(f: F) -> Self
    where
        F: Fn(&Record) -> Value + Send + Sync + 'static,
    {
        KeySource::Function(Arc::new(f))
    }

    /// Extract the key from a record.
    pub fn extract(&self, record: &Record) -> Value {
        match self {
            KeySource::Attribute(name) => record.get(name),
            KeySource::Function(f) => f(record),
        }
    }

    /// The attribute name, when the key is read from an attribute.
    pub fn attribute_name(&self) -> Option<&str> {
        match self {
            KeySource::Attribute(name) => Some(name),
            KeySource::Function(_) => None,
        }
    }

    /// Returns true for function keys.
    pub fn is_function(&self) -> bool {
        matches!(self, KeySource::Function(_))
    }

    pub(crate) fn validate(&self, context: &str) -> Result<(), ConfigError> {
        match self {
            KeySource::Attribute(name) if name.is_empty() => Err(ConfigError::EmptyAttributeName {
                context: context.to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Attribute(name) => f.debug_tuple("Attribute").field(name).finish(),
            KeySource::Function(_) => f.write_str("Function(..)"),
        }
    }
}

impl From<&str> for KeySource {
    fn from(name: &str) -> Self {
        KeySource::attribute(name)
    }
}

impl From<String> for KeySource {
    fn from(name: String) -> Self {
        KeySource::Attribute(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::record::RecordId;

    #[test]
    fn test_attribute_key() {
        let record = Record::with_id(RecordId::new(1), [("priority", 3)]);
        let key = KeySource::from("priority");

        assert_eq!(key.extract(&record), Value::from(3));
        assert_eq!(key.attribute_name(), Some("priority"));
        assert!(!key.is_function());
    }

    #[test]
    fn test_function_key() {
        let record = Record::with_id(RecordId::new(1), [("first", "Ada"), ("last", "Lovelace")]);
        let key = KeySource::function(|r| Value::from(format!("{} {}", r.get("first"), r.get("last"))));

        assert_eq!(key.extract(&record), Value::from("Ada Lovelace"));
        assert_eq!(key.attribute_name(), None);
        assert!(key.is_function());
        assert_eq!(format!("{key:?}"), "Function(..)");
    }

    #[test]
    fn test_validate_rejects_empty_attribute() {
        assert!(KeySource::attribute("name").validate("comparator").is_ok());
        assert_eq!(
            KeySource::attribute("").validate("comparator"),
            Err(ConfigError::EmptyAttributeName {
                context: "comparator".to_string()
            })
        );
    }
}
