use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// Generic payload of a node: an id plus three field families.
///
/// Every typed model in this crate is a view over a `Record`, so a single
/// serializer can handle any namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub id: String,
    #[serde(default)]
    pub simple_fields: BTreeMap<String, String>,
    #[serde(default)]
    pub list_fields: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub map_fields: BTreeMap<String, BTreeMap<String, String>>,
}

impl Record {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    pub fn simple_field(
        &self,
        key: &str,
    ) -> Option<&str> {
        self.simple_fields.get(key).map(String::as_str)
    }

    pub fn set_simple_field(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.simple_fields.insert(key.into(), value.into());
    }

    pub fn list_field(
        &self,
        key: &str,
    ) -> Option<&[String]> {
        self.list_fields.get(key).map(Vec::as_slice)
    }

    pub fn set_list_field(
        &mut self,
        key: impl Into<String>,
        value: Vec<String>,
    ) {
        self.list_fields.insert(key.into(), value);
    }

    pub fn map_field(
        &self,
        key: &str,
    ) -> Option<&BTreeMap<String, String>> {
        self.map_fields.get(key)
    }

    pub fn set_map_field(
        &mut self,
        key: impl Into<String>,
        value: BTreeMap<String, String>,
    ) {
        self.map_fields.insert(key.into(), value);
    }
}

impl fmt::Display for Record {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        write!(
            f,
            "{}, {:?}{:?}{:?}",
            self.id, self.simple_fields, self.list_fields, self.map_fields
        )
    }
}
