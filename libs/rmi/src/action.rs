//! Action maps
//!
//! An [`ActionMap`] is the allow-list of an instance: only the names it declares are
//! reachable remotely, and each name carries the [`ResponseShape`] that decides how the
//! method's return value is marshaled back.
//!
//! Action maps are usually declared in code:
//!
//! ```
//! use rmi_server::ActionMap;
//!
//! let document = ActionMap::new().value("read").void("close");
//! let root = ActionMap::new().value("echo").instance("open", document);
//! assert_eq!(root.names(), vec!["echo", "open"]);
//! ```
//!
//! or loaded from configuration, where a string selects a primitive shape and a nested
//! table selects a nested instance:
//!
//! ```toml
//! [actions]
//! echo = "value"
//! ping = "void"
//! reject = "error"
//!
//! [actions.open]
//! read = "string"
//! close = "void"
//! ```

use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Marshaling policy for one action's return value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseShape {
    /// Reply `null` whatever the method returned
    Void,
    /// Reply with the returned value unchanged
    Value,
    /// Expose the returned object as a nested instance with these actions
    Instance(ActionMap),
    /// Format the returned value as a recoverable error
    Error,
}

impl ResponseShape {
    /// Shape named by a configuration string.
    ///
    /// `"void"`, `"null"` and `"none"` select [`ResponseShape::Void`] and `"error"` selects
    /// [`ResponseShape::Error`]. Any other name (`"value"`, `"string"`, `"number"`...) is
    /// a passthrough.
    pub fn from_name(name: &str) -> Self {
        match name {
            "void" | "null" | "none" => Self::Void,
            "error" => Self::Error,
            _ => Self::Value,
        }
    }

    pub fn is_instance(&self) -> bool {
        matches!(self, Self::Instance(_))
    }
}

impl Serialize for ResponseShape {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Void => serializer.serialize_str("void"),
            Self::Value => serializer.serialize_str("value"),
            Self::Error => serializer.serialize_str("error"),
            Self::Instance(actions) => actions.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for ResponseShape {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ShapeVisitor;

        impl<'de> Visitor<'de> for ShapeVisitor {
            type Value = ResponseShape;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a response shape name, null or a nested action map")
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<ResponseShape, E> {
                Ok(ResponseShape::from_name(value))
            }

            fn visit_unit<E: de::Error>(self) -> Result<ResponseShape, E> {
                Ok(ResponseShape::Void)
            }

            fn visit_none<E: de::Error>(self) -> Result<ResponseShape, E> {
                Ok(ResponseShape::Void)
            }

            fn visit_map<A: MapAccess<'de>>(self, map: A) -> Result<ResponseShape, A::Error> {
                ActionMap::deserialize(de::value::MapAccessDeserializer::new(map))
                    .map(ResponseShape::Instance)
            }
        }

        deserializer.deserialize_any(ShapeVisitor)
    }
}

/// Ordered allow-list of action names and their response shapes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionMap {
    entries: Vec<(String, ResponseShape)>,
}

impl ActionMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`ActionMap::insert`]
    pub fn with(mut self, name: impl Into<String>, shape: ResponseShape) -> Self {
        self.insert(name, shape);
        self
    }

    pub fn void(self, name: impl Into<String>) -> Self {
        self.with(name, ResponseShape::Void)
    }

    pub fn value(self, name: impl Into<String>) -> Self {
        self.with(name, ResponseShape::Value)
    }

    pub fn error(self, name: impl Into<String>) -> Self {
        self.with(name, ResponseShape::Error)
    }

    pub fn instance(self, name: impl Into<String>, actions: ActionMap) -> Self {
        self.with(name, ResponseShape::Instance(actions))
    }

    /// Declare `name`. Redeclaring a name replaces its shape in place.
    pub fn insert(&mut self, name: impl Into<String>, shape: ResponseShape) {
        let name = name.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = shape,
            None => self.entries.push((name, shape)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ResponseShape> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, shape)| shape)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Declared names in declaration order
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ResponseShape)> {
        self.entries
            .iter()
            .map(|(name, shape)| (name.as_str(), shape))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<N: Into<String>> FromIterator<(N, ResponseShape)> for ActionMap {
    fn from_iter<I: IntoIterator<Item = (N, ResponseShape)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (name, shape) in iter {
            map.insert(name, shape);
        }
        map
    }
}

impl Serialize for ActionMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, shape) in &self.entries {
            map.serialize_entry(name, shape)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for ActionMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MapVisitor;

        impl<'de> Visitor<'de> for MapVisitor {
            type Value = ActionMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of action names to response shapes")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<ActionMap, A::Error> {
                let mut map = ActionMap::new();
                while let Some((name, shape)) = access.next_entry::<String, ResponseShape>()? {
                    if map.contains(&name) {
                        return Err(de::Error::custom(format!("duplicate action '{name}'")));
                    }
                    map.entries.push((name, shape));
                }
                Ok(map)
            }
        }

        deserializer.deserialize_map(MapVisitor)
    }
}
