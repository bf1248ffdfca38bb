//! Opaque chunk payloads.

/// The content of a single chunk: an opaque byte blob plus a generation
/// flag.
///
/// The streaming engine never interprets the bytes; higher layers own the
/// content format. `generated` distinguishes real content from the
/// placeholder a store returns on a miss. Payloads are owned by exactly one
/// holder at a time — the engine clones them when handing a copy to the
/// store or to event consumers, never sharing a mutable reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPayload {
    bytes: Vec<u8>,
    generated: bool,
}

impl ChunkPayload {
    /// Creates a generated payload from raw content bytes.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            generated: true,
        }
    }

    /// Creates the placeholder payload a store returns when a chunk has
    /// never been saved. Carries no content.
    pub fn placeholder() -> Self {
        Self {
            bytes: Vec::new(),
            generated: false,
        }
    }

    /// The payload's content bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Whether the store holds real content for this chunk, as opposed to a
    /// placeholder.
    pub fn is_generated(&self) -> bool {
        self.generated
    }

    /// Content length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` if the payload carries no content bytes.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl Default for ChunkPayload {
    fn default() -> Self {
        Self::placeholder()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_payload_is_generated() {
        let p = ChunkPayload::new(vec![1, 2, 3]);
        assert!(p.is_generated());
        assert_eq!(p.bytes(), &[1, 2, 3]);
        assert_eq!(p.len(), 3);
    }

    #[test]
    fn test_placeholder_is_not_generated() {
        let p = ChunkPayload::placeholder();
        assert!(!p.is_generated());
        assert!(p.is_empty());
    }
}
