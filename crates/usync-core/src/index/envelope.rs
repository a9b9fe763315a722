//! Signed, encrypted framing for the core index.
//!
//! Wire layout: `USIX` magic, u16 version, u32 original JSON size, u32
//! compressed size, u32 access-header length, access-header JSON (clear),
//! u32 ciphertext length, AEAD blob of the deflated document, 32-byte
//! Ed25519 verifying key, 64-byte signature over every preceding byte.
//! Integers little-endian. Decoders reject on any structural mismatch.

use ed25519_dalek::{Signature, VerifyingKey};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{Read, Write};

use crate::access::{unwrap_session_key, Credentials};
use crate::crypto::{aead, FolderKeys};
use crate::error::CoreError;

use super::document::{AccessHeader, CoreIndex};

pub const INDEX_MAGIC: &[u8; 4] = b"USIX";
pub const ENVELOPE_VERSION: u16 = 1;

fn deflate(data: &[u8]) -> Result<Vec<u8>, CoreError> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| CoreError::Permanent(format!("deflating index: {e}")))
}

fn inflate(data: &[u8], expected_len: usize) -> Result<Vec<u8>, CoreError> {
    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::with_capacity(expected_len);
    // Bound the read so a forged length field cannot balloon memory.
    decoder
        .by_ref()
        .take(expected_len as u64 + 1)
        .read_to_end(&mut out)
        .map_err(|e| CoreError::InvalidFormat(format!("inflating index: {e}")))?;
    if out.len() != expected_len {
        return Err(CoreError::InvalidFormat(
            "index size does not match envelope header".into(),
        ));
    }
    Ok(out)
}

/// Serialize, compress, encrypt, and sign a core index.
///
/// `doc.encryption` must already hold the wrapping metadata for the share's
/// access class; the clear access header is derived from it.
pub fn seal_envelope(
    doc: &CoreIndex,
    session_key: &[u8; 32],
    keys: &FolderKeys,
) -> Result<Vec<u8>, CoreError> {
    let json = serde_json::to_vec(doc)
        .map_err(|e| CoreError::Permanent(format!("serializing index: {e}")))?;
    let deflated = deflate(&json)?;
    let cipher = aead::seal(session_key, &deflated, doc.share.share_id.as_bytes());

    let access = AccessHeader {
        share_id: doc.share.share_id.clone(),
        access_class: doc.share.access_class,
        encryption: doc.encryption.for_access_header(),
    };
    let access_json = serde_json::to_vec(&access)
        .map_err(|e| CoreError::Permanent(format!("serializing access header: {e}")))?;

    let mut out = Vec::with_capacity(
        4 + 2 + 4 + 4 + 4 + access_json.len() + 4 + cipher.len() + 32 + 64,
    );
    out.extend_from_slice(INDEX_MAGIC);
    out.extend_from_slice(&ENVELOPE_VERSION.to_le_bytes());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(&(deflated.len() as u32).to_le_bytes());
    out.extend_from_slice(&(access_json.len() as u32).to_le_bytes());
    out.extend_from_slice(&access_json);
    out.extend_from_slice(&(cipher.len() as u32).to_le_bytes());
    out.extend_from_slice(&cipher);

    let signature = keys.sign(&out);
    out.extend_from_slice(&keys.verifying_key().to_bytes());
    out.extend_from_slice(&signature.to_bytes());
    Ok(out)
}

fn take<'a>(bytes: &'a [u8], at: &mut usize, n: usize) -> Result<&'a [u8], CoreError> {
    let end = at
        .checked_add(n)
        .filter(|&end| end <= bytes.len())
        .ok_or_else(|| CoreError::InvalidFormat("truncated index envelope".into()))?;
    let out = &bytes[*at..end];
    *at = end;
    Ok(out)
}

/// Parse the clear portion of an envelope without decrypting. Verifies the
/// embedded signature first.
pub fn read_access_header(bytes: &[u8]) -> Result<AccessHeader, CoreError> {
    let (header, _, _) = split_envelope(bytes)?;
    Ok(header)
}

fn split_envelope(bytes: &[u8]) -> Result<(AccessHeader, Vec<u8>, (u32, u32)), CoreError> {
    if bytes.len() < 4 + 2 + 4 + 4 + 4 + 4 + 32 + 64 {
        return Err(CoreError::InvalidFormat("index envelope too short".into()));
    }
    let (signed, trailer) = bytes.split_at(bytes.len() - 96);
    let vk_bytes: [u8; 32] = trailer[..32].try_into().unwrap();
    let sig_bytes: [u8; 64] = trailer[32..].try_into().unwrap();
    let vk = VerifyingKey::from_bytes(&vk_bytes)
        .map_err(|_| CoreError::InvalidFormat("malformed verifying key".into()))?;
    vk.verify_strict(signed, &Signature::from_bytes(&sig_bytes))
        .map_err(|_| CoreError::Integrity("index signature mismatch".into()))?;

    let mut at = 0usize;
    if take(signed, &mut at, 4)? != INDEX_MAGIC {
        return Err(CoreError::InvalidFormat("bad index magic".into()));
    }
    let version = u16::from_le_bytes(take(signed, &mut at, 2)?.try_into().unwrap());
    if version != ENVELOPE_VERSION {
        return Err(CoreError::InvalidFormat(format!(
            "unsupported envelope version {version}"
        )));
    }
    let orig_size = u32::from_le_bytes(take(signed, &mut at, 4)?.try_into().unwrap());
    let compressed_size = u32::from_le_bytes(take(signed, &mut at, 4)?.try_into().unwrap());
    let header_len = u32::from_le_bytes(take(signed, &mut at, 4)?.try_into().unwrap()) as usize;
    let header: AccessHeader = serde_json::from_slice(take(signed, &mut at, header_len)?)
        .map_err(|e| CoreError::InvalidFormat(format!("malformed access header: {e}")))?;
    let cipher_len = u32::from_le_bytes(take(signed, &mut at, 4)?.try_into().unwrap()) as usize;
    let cipher = take(signed, &mut at, cipher_len)?.to_vec();
    if at != signed.len() {
        return Err(CoreError::InvalidFormat("trailing bytes in envelope".into()));
    }
    Ok((header, cipher, (orig_size, compressed_size)))
}

/// Verify, decrypt, and parse a fetched envelope.
pub fn open_envelope(bytes: &[u8], credentials: &Credentials) -> Result<CoreIndex, CoreError> {
    let (header, cipher, (orig_size, compressed_size)) = split_envelope(bytes)?;
    let session_key = unwrap_session_key(&header, credentials)?;
    let deflated = aead::open(&session_key, &cipher, header.share_id.as_bytes())?;
    if deflated.len() != compressed_size as usize {
        return Err(CoreError::InvalidFormat(
            "compressed size does not match envelope header".into(),
        ));
    }
    let json = inflate(&deflated, orig_size as usize)?;
    let doc: CoreIndex = serde_json::from_slice(&json)
        .map_err(|e| CoreError::InvalidFormat(format!("malformed index document: {e}")))?;
    if doc.share.share_id != header.share_id {
        return Err(CoreError::Integrity(
            "share id differs between envelope and document".into(),
        ));
    }
    Ok(doc)
}
