//! Ordered, multi-valued header mapping used by recorded messages.
//!
//! Cassettes store headers as `{"Name": ["value", ...]}` objects. The mapping
//! keeps names in first-insertion order so a replayed response carries its
//! headers in the order they were recorded.

use hyper::header::{HeaderName, HeaderValue};
use hyper::HeaderMap;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Header name -> ordered values, in first-insertion order.
///
/// Lookups are ASCII case-insensitive, matching HTTP header semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMapping {
    entries: Vec<(String, Vec<String>)>,
}

impl HeaderMapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a mapping from a hyper header map, using canonical (Title-Case) names.
    ///
    /// Values that are not valid UTF-8 are converted lossily.
    pub fn from_header_map(headers: &HeaderMap) -> Self {
        let mut mapping = Self::new();
        for (name, value) in headers.iter() {
            mapping.append(
                &canonical_header_name(name.as_str()),
                String::from_utf8_lossy(value.as_bytes()).into_owned(),
            );
        }
        mapping
    }

    /// Convert back into a hyper header map, keeping recorded order.
    ///
    /// Names or values hyper rejects are skipped.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, values) in &self.entries {
            let Ok(header_name) = HeaderName::from_bytes(name.as_bytes()) else {
                continue;
            };
            for value in values {
                if let Ok(header_value) = HeaderValue::from_str(value) {
                    headers.append(header_name.clone(), header_value);
                }
            }
        }
        headers
    }

    /// Append a value, creating the entry if the name is new.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        match self.position(name) {
            Some(idx) => self.entries[idx].1.push(value.into()),
            None => self.entries.push((name.to_string(), vec![value.into()])),
        }
    }

    /// Replace every value stored under `name`.
    pub fn set(&mut self, name: &str, values: Vec<String>) {
        match self.position(name) {
            Some(idx) => self.entries[idx].1 = values,
            None => self.entries.push((name.to_string(), values)),
        }
    }

    /// All values for `name`; empty when the header is absent.
    pub fn values(&self, name: &str) -> &[String] {
        self.position(name)
            .map(|idx| self.entries[idx].1.as_slice())
            .unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.values(name).first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(existing, _)| existing.eq_ignore_ascii_case(name))
    }
}

/// Convert hyper's lowercase header names to Title-Case ("content-type" -> "Content-Type").
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

impl Serialize for HeaderMapping {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, values) in &self.entries {
            map.serialize_entry(name, values)?;
        }
        map.end()
    }
}

struct HeaderMappingVisitor;

impl<'de> Visitor<'de> for HeaderMappingVisitor {
    type Value = HeaderMapping;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a map of header names to value lists, or null")
    }

    fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(HeaderMapping::new())
    }

    fn visit_none<E: serde::de::Error>(self) -> Result<Self::Value, E> {
        Ok(HeaderMapping::new())
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut mapping = HeaderMapping::new();
        while let Some((name, values)) = access.next_entry::<String, Option<Vec<String>>>()? {
            for value in values.unwrap_or_default() {
                mapping.append(&name, value);
            }
            if mapping.position(&name).is_none() {
                mapping.set(&name, Vec::new());
            }
        }
        Ok(mapping)
    }
}

impl<'de> Deserialize<'de> for HeaderMapping {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_option(HeaderMappingVisitor)
    }
}
