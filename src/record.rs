//! Directory records: an ordered list of attributes, each either a scalar or
//! a multi-valued list of strings.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttrValue {
    Null,
    Int(i64),
    Str(String),
    Multi(Vec<String>),
}

impl AttrValue {
    /// String form of the whole value. Multi-valued attributes are joined
    /// with `;`, the same encoding the store uses on disk.
    pub fn as_text(&self) -> Cow<'_, str> {
        match self {
            AttrValue::Null => Cow::Borrowed(""),
            AttrValue::Int(n) => Cow::Owned(n.to_string()),
            AttrValue::Str(s) => Cow::Borrowed(s.as_str()),
            AttrValue::Multi(items) => Cow::Owned(items.join(";")),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            AttrValue::Int(n) => Some(*n),
            AttrValue::Str(s) => s.trim().parse().ok(),
            AttrValue::Null | AttrValue::Multi(_) => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            AttrValue::Null => false,
            AttrValue::Int(_) => true,
            AttrValue::Str(s) => !s.is_empty(),
            AttrValue::Multi(items) => !items.is_empty(),
        }
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        AttrValue::Str(s.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(s: String) -> Self {
        AttrValue::Str(s)
    }
}

impl From<i64> for AttrValue {
    fn from(n: i64) -> Self {
        AttrValue::Int(n)
    }
}

impl From<Vec<String>> for AttrValue {
    fn from(items: Vec<String>) -> Self {
        AttrValue::Multi(items)
    }
}

impl From<JsonValue> for AttrValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => AttrValue::Null,
            JsonValue::Bool(b) => AttrValue::Str(b.to_string()),
            JsonValue::Number(n) => n
                .as_i64()
                .map(AttrValue::Int)
                .unwrap_or_else(|| AttrValue::Str(n.to_string())),
            JsonValue::String(s) => AttrValue::Str(s),
            JsonValue::Array(items) => AttrValue::Multi(items.into_iter().map(json_text).collect()),
            other @ JsonValue::Object(_) => AttrValue::Str(other.to_string()),
        }
    }
}

impl<'de> Deserialize<'de> for AttrValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        JsonValue::deserialize(deserializer).map(AttrValue::from)
    }
}

fn json_text(value: JsonValue) -> String {
    match value {
        JsonValue::String(s) => s,
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Record {
    attrs: Vec<(String, AttrValue)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.attrs.push((name.into(), value.into()));
    }

    #[cfg(test)]
    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.attrs.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Case-insensitive attribute lookup. The first attribute whose
    /// lower-cased name matches wins; a `Null` value counts as absent.
    pub fn lookup(&self, name: &str) -> Option<&AttrValue> {
        let name_lower = name.to_lowercase();
        let (_, value) = self
            .attrs
            .iter()
            .find(|(key, _)| key.to_lowercase() == name_lower)?;
        match value {
            AttrValue::Null => None,
            value => Some(value),
        }
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.attrs.len()))?;
        for (name, value) in &self.attrs {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RecordVisitor;

        impl<'de> Visitor<'de> for RecordVisitor {
            type Value = Record;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("an object of attributes")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Record, A::Error> {
                let mut record = Record::new();
                while let Some((name, value)) = access.next_entry::<String, AttrValue>()? {
                    record.push(name, value);
                }
                Ok(record)
            }
        }

        deserializer.deserialize_map(RecordVisitor)
    }
}
