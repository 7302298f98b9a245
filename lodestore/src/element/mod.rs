//! The record model: named byte-valued properties grouped into elements.
//! Content is untyped at rest; the schema supplies the semantic type of
//! every property at evaluation time.

use crate::codec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single named, raw byte-valued field of an element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prop {
    pub name: String,
    pub content: Vec<u8>,
}

impl Prop {
    pub fn new(name: impl Into<String>, content: Vec<u8>) -> Self {
        Prop {
            name: name.into(),
            content,
        }
    }

    /// A property holding a 4-byte little-endian int32.
    pub fn integer(name: impl Into<String>, value: i32) -> Self {
        Prop::new(name, codec::encode_i32(value))
    }

    /// A property holding an 8-byte IEEE-754 double.
    pub fn decimal(name: impl Into<String>, value: f64) -> Self {
        Prop::new(name, codec::encode_f64(value))
    }

    /// A property holding an 8-byte little-endian tick count.
    pub fn date(name: impl Into<String>, ticks: i64) -> Self {
        Prop::new(name, codec::encode_ticks(ticks))
    }

    /// A property holding a 1-byte boolean.
    pub fn switch(name: impl Into<String>, value: bool) -> Self {
        Prop::new(name, codec::encode_switch(value))
    }

    /// A property holding raw UTF-8 text.
    pub fn text(name: impl Into<String>, value: impl AsRef<str>) -> Self {
        Prop::new(name, value.as_ref().as_bytes().to_vec())
    }
}

/// An identified record made of named byte-valued properties. Property
/// names are unique within an element; lookups by unknown name return None.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    id: String,
    props: BTreeMap<String, Vec<u8>>,
}

impl Element {
    pub fn new(id: impl Into<String>, props: Vec<Prop>) -> Self {
        let mut element = Element {
            id: id.into(),
            props: BTreeMap::new(),
        };
        element.update(props);
        element
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Raw bytes of a property, or None if the element has no such property.
    pub fn prop(&self, name: &str) -> Option<&[u8]> {
        self.props.get(name).map(|v| v.as_slice())
    }

    /// All properties in name order.
    pub fn props(&self) -> impl Iterator<Item = Prop> + '_ {
        self.props
            .iter()
            .map(|(name, content)| Prop::new(name.clone(), content.clone()))
    }

    pub fn prop_names(&self) -> impl Iterator<Item = &str> {
        self.props.keys().map(|k| k.as_str())
    }

    /// Apply properties in place, last-write-wins per name.
    pub fn update(&mut self, props: Vec<Prop>) {
        for prop in props {
            self.props.insert(prop.name, prop.content);
        }
    }
}

/// Wire form of an element: `(id, [(prop_name, raw_bytes)])`. No type
/// information crosses this boundary; the remote side must hold the same
/// schema to interpret the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializedElement {
    pub id: String,
    pub props: Vec<(String, Vec<u8>)>,
}

impl From<&Element> for SerializedElement {
    fn from(element: &Element) -> Self {
        SerializedElement {
            id: element.id.clone(),
            props: element
                .props
                .iter()
                .map(|(name, content)| (name.clone(), content.clone()))
                .collect(),
        }
    }
}

impl From<SerializedElement> for Element {
    fn from(wire: SerializedElement) -> Self {
        Element::new(
            wire.id,
            wire.props
                .into_iter()
                .map(|(name, content)| Prop::new(name, content))
                .collect(),
        )
    }
}
