//! RIFF chunk encoding
//!
//! A chunk is a four-byte id, a little-endian u32 payload size and the
//! payload, followed by one zero pad byte when the payload length is odd.
//! The size field never counts the pad; the enclosing RIFF size does.

use crate::error::{EnforcerError, Result};

/// One RIFF chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    id: [u8; 4],
    payload: Vec<u8>,
}

impl Chunk {
    pub fn new(id: [u8; 4], payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    pub fn id(&self) -> &[u8; 4] {
        &self.id
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Bytes this chunk occupies on disk, header and pad included
    pub fn encoded_len(&self) -> usize {
        8 + self.payload.len() + (self.payload.len() & 1)
    }

    fn write_to(&self, out: &mut Vec<u8>) -> Result<()> {
        out.extend_from_slice(&self.id);
        out.extend_from_slice(&size_field(self.payload.len())?.to_le_bytes());
        out.extend_from_slice(&self.payload);
        if self.payload.len() % 2 == 1 {
            out.push(0);
        }
        Ok(())
    }
}

fn size_field(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| EnforcerError::ProcessingError {
        reason: format!("chunk of {} bytes exceeds the RIFF 4 GiB limit", len),
    })
}

/// Little-endian field builder for chunk payloads
#[derive(Debug, Default)]
pub struct PayloadBuilder {
    bytes: Vec<u8>,
}

impl PayloadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.bytes.push(value);
        self
    }

    pub fn i8(mut self, value: i8) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u16(mut self, value: u16) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// Assemble a complete `RIFF....WAVE` file from its chunks
pub fn riff_wave(chunks: &[Chunk]) -> Result<Vec<u8>> {
    let body: usize = 4 + chunks.iter().map(Chunk::encoded_len).sum::<usize>();
    let mut out = Vec::with_capacity(8 + body);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&size_field(body)?.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    for chunk in chunks {
        chunk.write_to(&mut out)?;
    }
    Ok(out)
}

/// Split a `RIFF....WAVE` file back into its chunks
///
/// # Errors
/// * `InvalidAudio` - If the header is wrong or a chunk runs past the end
pub fn parse_chunks(bytes: &[u8]) -> Result<Vec<Chunk>> {
    let invalid = |reason: &str| EnforcerError::InvalidAudio {
        reason: reason.to_string(),
        source: None,
    };

    if bytes.len() < 12 || &bytes[0..4] != b"RIFF" || &bytes[8..12] != b"WAVE" {
        return Err(invalid("missing RIFF/WAVE header"));
    }

    let mut chunks = Vec::new();
    let mut pos = 12;
    while pos + 8 <= bytes.len() {
        let mut id = [0u8; 4];
        id.copy_from_slice(&bytes[pos..pos + 4]);
        let mut size = [0u8; 4];
        size.copy_from_slice(&bytes[pos + 4..pos + 8]);
        let size = u32::from_le_bytes(size) as usize;

        let start = pos + 8;
        let end = start
            .checked_add(size)
            .filter(|&end| end <= bytes.len())
            .ok_or_else(|| invalid("chunk extends past end of file"))?;
        chunks.push(Chunk::new(id, bytes[start..end].to_vec()));
        pos = end + (size & 1);
    }
    Ok(chunks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_even_chunk_layout() {
        let bytes = riff_wave(&[Chunk::new(*b"abcd", vec![1, 2])]).unwrap();
        assert_eq!(
            bytes,
            vec![
                b'R', b'I', b'F', b'F', 14, 0, 0, 0, b'W', b'A', b'V', b'E', //
                b'a', b'b', b'c', b'd', 2, 0, 0, 0, 1, 2,
            ]
        );
    }

    #[test]
    fn test_odd_chunk_is_padded_and_counted() {
        let bytes = riff_wave(&[Chunk::new(*b"odd ", vec![7, 8, 9])]).unwrap();
        // size field holds the exact payload length
        assert_eq!(&bytes[16..20], &[3, 0, 0, 0]);
        // pad byte follows the payload
        assert_eq!(&bytes[20..24], &[7, 8, 9, 0]);
        // RIFF size counts the pad
        assert_eq!(u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]), 16);
        assert_eq!(bytes.len(), 24);
    }

    #[test]
    fn test_parse_round_trip_with_padding() {
        let chunks = vec![
            Chunk::new(*b"one ", vec![1, 2, 3]),
            Chunk::new(*b"two ", vec![4, 5]),
        ];
        let parsed = parse_chunks(&riff_wave(&chunks).unwrap()).unwrap();
        assert_eq!(parsed, chunks);
    }

    #[test]
    fn test_parse_rejects_truncation() {
        let mut bytes = riff_wave(&[Chunk::new(*b"data", vec![0; 10])]).unwrap();
        bytes.truncate(bytes.len() - 4);
        assert!(parse_chunks(&bytes).is_err());
        assert!(parse_chunks(b"RIFX\0\0\0\0WAVE").is_err());
    }

    #[test]
    fn test_payload_builder_is_little_endian() {
        let payload = PayloadBuilder::new()
            .u16(0x0102)
            .u32(0x03040506)
            .i8(-1)
            .u8(9)
            .finish();
        assert_eq!(payload, vec![0x02, 0x01, 0x06, 0x05, 0x04, 0x03, 0xFF, 9]);
    }
}
