use bytes::Bytes;

/// One incrementally produced unit of upstream output.
///
/// `payload` is opaque to the relay: UTF-8 text deltas for chat, raw
/// encoded bytes for audio.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamChunk {
    /// Zero-based position in the upstream sequence.
    pub sequence_index: u64,
    pub payload: Bytes,
    /// The upstream has nothing further to send after this chunk.
    pub is_final: bool,
}

impl StreamChunk {
    pub fn new(sequence_index: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_index,
            payload: payload.into(),
            is_final: false,
        }
    }

    pub fn final_chunk(sequence_index: u64, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_index,
            payload: payload.into(),
            is_final: true,
        }
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as text, replacing invalid UTF-8 sequences.
    pub fn text_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_chunk_is_not_final() {
        let chunk = StreamChunk::new(0, "hi");
        assert!(!chunk.is_final);
        assert_eq!(chunk.len(), 2);
    }

    #[test]
    fn test_text_lossy_replaces_invalid_bytes() {
        let chunk = StreamChunk::new(3, vec![b'o', b'k', 0xff]);
        assert_eq!(chunk.text_lossy(), "ok\u{fffd}");
    }
}
