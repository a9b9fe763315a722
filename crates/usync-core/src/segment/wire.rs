//! Per-segment article body framing (inside the AEAD envelope).
//!
//! Layout: `USSG` magic, u16 version, u8 flags (bit0 = compressed),
//! u8 replica_index, u32 segment_index, u32 file_id, 32-byte plaintext
//! hash, payload. All integers little-endian.

use crate::error::CoreError;

pub const SEGMENT_MAGIC: &[u8; 4] = b"USSG";
pub const SEGMENT_WIRE_VERSION: u16 = 1;

const FLAG_COMPRESSED: u8 = 0b0000_0001;
const HEADER_LEN: usize = 4 + 2 + 1 + 1 + 4 + 4 + 32;

/// Decoded segment article body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentWire {
    pub compressed: bool,
    pub replica_index: u8,
    pub segment_index: u32,
    pub file_id: u32,
    pub plaintext_hash: [u8; 32],
    pub payload: Vec<u8>,
}

/// Frame one segment body for posting.
pub fn encode_segment(
    compressed: bool,
    replica_index: u8,
    segment_index: u32,
    file_id: u32,
    plaintext_hash: &[u8; 32],
    payload: &[u8],
) -> Vec<u8> {
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.extend_from_slice(SEGMENT_MAGIC);
    out.extend_from_slice(&SEGMENT_WIRE_VERSION.to_le_bytes());
    out.push(if compressed { FLAG_COMPRESSED } else { 0 });
    out.push(replica_index);
    out.extend_from_slice(&segment_index.to_le_bytes());
    out.extend_from_slice(&file_id.to_le_bytes());
    out.extend_from_slice(plaintext_hash);
    out.extend_from_slice(payload);
    out
}

/// Parse a segment body. Rejects bad magic, unknown versions, and short input.
pub fn decode_segment(bytes: &[u8]) -> Result<SegmentWire, CoreError> {
    if bytes.len() < HEADER_LEN {
        return Err(CoreError::InvalidFormat(format!(
            "segment body too short: {} bytes",
            bytes.len()
        )));
    }
    if &bytes[0..4] != SEGMENT_MAGIC {
        return Err(CoreError::InvalidFormat("bad segment magic".into()));
    }
    let version = u16::from_le_bytes([bytes[4], bytes[5]]);
    if version != SEGMENT_WIRE_VERSION {
        return Err(CoreError::InvalidFormat(format!(
            "unsupported segment wire version {version}"
        )));
    }
    let flags = bytes[6];
    let replica_index = bytes[7];
    let segment_index = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
    let file_id = u32::from_le_bytes(bytes[12..16].try_into().unwrap());
    let mut plaintext_hash = [0u8; 32];
    plaintext_hash.copy_from_slice(&bytes[16..48]);

    Ok(SegmentWire {
        compressed: flags & FLAG_COMPRESSED != 0,
        replica_index,
        segment_index,
        file_id,
        plaintext_hash,
        payload: bytes[HEADER_LEN..].to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let hash = [7u8; 32];
        let encoded = encode_segment(true, 2, 9, 41, &hash, b"payload");
        let decoded = decode_segment(&encoded).unwrap();
        assert!(decoded.compressed);
        assert_eq!(decoded.replica_index, 2);
        assert_eq!(decoded.segment_index, 9);
        assert_eq!(decoded.file_id, 41);
        assert_eq!(decoded.plaintext_hash, hash);
        assert_eq!(decoded.payload, b"payload");
    }

    #[test]
    fn rejects_bad_magic() {
        let mut encoded = encode_segment(false, 0, 0, 1, &[0u8; 32], b"x");
        encoded[0] = b'X';
        assert!(matches!(
            decode_segment(&encoded),
            Err(CoreError::InvalidFormat(_))
        ));
    }

    #[test]
    fn rejects_unknown_version() {
        let mut encoded = encode_segment(false, 0, 0, 1, &[0u8; 32], b"x");
        encoded[4] = 0xFF;
        assert!(decode_segment(&encoded).is_err());
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(decode_segment(b"USSG").is_err());
    }
}
