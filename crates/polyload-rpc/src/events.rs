//! Decoding of the raw `System.Events` storage value.

use polyload_types::{EventRecord, PolyloadError};

/// Turns the raw storage bytes of `System.Events` into typed records.
pub trait EventDecoder: Send + Sync {
    fn decode(&self, raw: &[u8]) -> polyload_types::Result<Vec<EventRecord>>;
}

/// Decodes a JSON array of [`EventRecord`]s.
///
/// Nodes that expose events this way (the development chain, indexer
/// proxies) work out of the box. SCALE-encoded storage needs a decoder
/// backed by runtime metadata.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonEventDecoder;

impl EventDecoder for JsonEventDecoder {
    fn decode(&self, raw: &[u8]) -> polyload_types::Result<Vec<EventRecord>> {
        if raw.is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_slice(raw)
            .map_err(|e| PolyloadError::Serialization(format!("System.Events: {e}")))
    }
}
