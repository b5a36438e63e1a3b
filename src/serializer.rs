//! Serializer registry.
//!
//! Records carry a numeric serializer id so values can be decoded by the
//! codec that wrote them. The engine never interprets ids beyond checking
//! that a record's id is registered; the upper persistence layer registers
//! its own codecs alongside the two built-ins.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Result, StrataError};

/// Built-in id for raw byte values.
pub const SERIALIZER_RAW: u32 = 0;

/// Built-in id for JSON-encoded values.
pub const SERIALIZER_JSON: u32 = 1;

/// Maps serializer ids to registered codec names.
#[derive(Debug, Clone)]
pub struct SerializerRegistry {
    names: HashMap<u32, &'static str>,
}

impl SerializerRegistry {
    /// A registry holding the two built-in codecs.
    pub fn new() -> Self {
        let mut names = HashMap::new();
        names.insert(SERIALIZER_RAW, "raw");
        names.insert(SERIALIZER_JSON, "json");
        Self { names }
    }

    /// Registers a caller-owned codec id. Re-registering an id is an error
    /// so stored records can never change meaning underneath a map.
    pub fn register(&mut self, id: u32, name: &'static str) -> Result<()> {
        if self.names.contains_key(&id) {
            return Err(StrataError::InvalidArgument(format!(
                "serializer id {id} already registered"
            )));
        }
        self.names.insert(id, name);
        Ok(())
    }

    pub fn is_registered(&self, id: u32) -> bool {
        self.names.contains_key(&id)
    }

    pub fn name(&self, id: u32) -> Option<&'static str> {
        self.names.get(&id).copied()
    }

    /// Fails with a corruption-adjacent error when a stored record names
    /// an id nobody registered.
    pub fn check(&self, id: u32) -> Result<()> {
        if self.is_registered(id) {
            Ok(())
        } else {
            Err(StrataError::NotFound("serializer"))
        }
    }
}

impl Default for SerializerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Encodes a value with the built-in JSON codec.
pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| StrataError::Serialization(e.to_string()))
}

/// Decodes a value written with the built-in JSON codec.
pub fn decode_json<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| StrataError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: u64,
        balance: i64,
    }

    #[test]
    fn builtins_are_registered() {
        let registry = SerializerRegistry::new();
        assert!(registry.is_registered(SERIALIZER_RAW));
        assert!(registry.is_registered(SERIALIZER_JSON));
        assert_eq!(registry.name(SERIALIZER_JSON), Some("json"));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = SerializerRegistry::new();
        registry.register(7, "msgpack").expect("register");
        let err = registry.register(7, "other").expect_err("duplicate id");
        assert!(matches!(err, StrataError::InvalidArgument(_)));
    }

    #[test]
    fn unknown_id_fails_check() {
        let registry = SerializerRegistry::new();
        assert!(matches!(
            registry.check(99),
            Err(StrataError::NotFound("serializer"))
        ));
    }

    #[test]
    fn json_round_trip() {
        let account = Account {
            id: 3,
            balance: -250,
        };
        let bytes = encode_json(&account).expect("encode");
        let back: Account = decode_json(&bytes).expect("decode");
        assert_eq!(back, account);
    }
}
