//! Identity Context Carrier
//!
//! Ordered, multi-valued snapshot of a call's metadata. The carrier is opaque
//! cargo: values are copied whole and never interpreted by the relay.

use thiserror::Error;
use tonic::metadata::{
    AsciiMetadataKey, AsciiMetadataValue, BinaryMetadataKey, BinaryMetadataValue,
    KeyAndValueRef, MetadataMap,
};
use tonic::Request;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CarrierError {
    #[error("invalid metadata name: {0}")]
    InvalidName(String),

    #[error("invalid value for metadata {0}")]
    InvalidValue(String),
}

#[derive(Debug, Clone, PartialEq)]
enum CarrierEntry {
    Ascii(AsciiMetadataKey, AsciiMetadataValue),
    Binary(BinaryMetadataKey, BinaryMetadataValue),
}

impl CarrierEntry {
    fn name(&self) -> &str {
        match self {
            CarrierEntry::Ascii(key, _) => key.as_str(),
            CarrierEntry::Binary(key, _) => key.as_str(),
        }
    }
}

/// Per-call identity context
///
/// Scoped to a single RPC. Built from inbound metadata, emitted as outbound
/// metadata, never shared between calls.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IdentityCarrier {
    entries: Vec<CarrierEntry>,
}

impl IdentityCarrier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the metadata of an inbound request. Never fails: a request
    /// without metadata yields an empty carrier.
    pub fn from_request<T>(request: &Request<T>) -> Self {
        Self::from_metadata(request.metadata())
    }

    pub fn from_metadata(metadata: &MetadataMap) -> Self {
        let entries = metadata
            .iter()
            .map(|entry| match entry {
                KeyAndValueRef::Ascii(key, value) => {
                    CarrierEntry::Ascii(key.clone(), value.clone())
                }
                KeyAndValueRef::Binary(key, value) => {
                    CarrierEntry::Binary(key.clone(), value.clone())
                }
            })
            .collect();

        Self { entries }
    }

    /// Emit every entry, in order, as outgoing metadata
    ///
    /// Repeated names keep all of their values in their original order.
    pub fn to_metadata(&self) -> MetadataMap {
        let mut metadata = MetadataMap::with_capacity(self.entries.len());
        for entry in &self.entries {
            match entry {
                CarrierEntry::Ascii(key, value) => {
                    metadata.append(key.clone(), value.clone());
                }
                CarrierEntry::Binary(key, value) => {
                    metadata.append_bin(key.clone(), value.clone());
                }
            }
        }
        metadata
    }

    /// Append a text value, keeping any existing values for `name`
    pub fn append(&mut self, name: &str, value: &str) -> Result<(), CarrierError> {
        let key = AsciiMetadataKey::from_bytes(name.as_bytes())
            .map_err(|_| CarrierError::InvalidName(name.to_string()))?;
        let value = AsciiMetadataValue::try_from(value)
            .map_err(|_| CarrierError::InvalidValue(name.to_string()))?;

        self.entries.push(CarrierEntry::Ascii(key, value));
        Ok(())
    }

    /// Append a binary value; `name` must end in `-bin`
    pub fn append_bin(&mut self, name: &str, value: &[u8]) -> Result<(), CarrierError> {
        let key = BinaryMetadataKey::from_bytes(name.as_bytes())
            .map_err(|_| CarrierError::InvalidName(name.to_string()))?;

        self.entries
            .push(CarrierEntry::Binary(key, BinaryMetadataValue::from_bytes(value)));
        Ok(())
    }

    /// First text value for `name`, compared case-insensitively
    ///
    /// Returns `None` when the name is absent or its first value is not
    /// printable ASCII.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.ascii_values(name).next().and_then(|v| v.to_str().ok())
    }

    /// All printable text values for `name`, in arrival order
    pub fn get_all<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.ascii_values(name).filter_map(|v| v.to_str().ok())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries
            .iter()
            .any(|entry| entry.name().eq_ignore_ascii_case(name))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entry names in order, one per value
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(CarrierEntry::name)
    }

    /// `(name, value)` pairs in order, values as they appear on the wire
    /// (`-bin` values stay base64-encoded)
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.entries.iter().map(|entry| match entry {
            CarrierEntry::Ascii(key, value) => (key.as_str(), value.as_encoded_bytes()),
            CarrierEntry::Binary(key, value) => (key.as_str(), value.as_encoded_bytes()),
        })
    }

    fn ascii_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a AsciiMetadataValue> + 'a {
        // Stored keys are already lowercase
        let name = name.to_ascii_lowercase();
        self.entries.iter().filter_map(move |entry| match entry {
            CarrierEntry::Ascii(key, value) if key.as_str() == name => Some(value),
            _ => None,
        })
    }
}
