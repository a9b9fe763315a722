//! Fixed-size segment planning and streaming file reads.

use anyhow::{Context, Result};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::scanner::sha256_hex;

/// One planned slice of a file: byte range `[offset, offset + size)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlannedSegment {
    pub index: u32,
    pub offset: u64,
    pub size: u64,
}

/// Cut `total_size` bytes into segments of exactly `segment_size`, except
/// possibly the last. A zero-byte file yields no segments.
pub fn plan_segments(total_size: u64, segment_size: usize) -> Vec<PlannedSegment> {
    let segment_size = segment_size.max(1) as u64;
    if total_size == 0 {
        return Vec::new();
    }
    let count = total_size.div_ceil(segment_size);
    let mut out = Vec::with_capacity(count as usize);
    let mut offset = 0u64;
    for index in 0..count {
        let size = segment_size.min(total_size - offset);
        out.push(PlannedSegment {
            index: index as u32,
            offset,
            size,
        });
        offset += size;
    }
    out
}

/// A segment read from disk, hashed, with the compression decision applied.
#[derive(Debug, Clone)]
pub struct PreparedSegment {
    pub index: u32,
    pub offset: u64,
    /// Raw (uncompressed) size.
    pub size: u64,
    /// SHA-256 of the raw bytes, lowercase hex.
    pub plaintext_hash: String,
    pub compressed: bool,
    /// Compressed bytes if `compressed`, raw bytes otherwise.
    pub body: Vec<u8>,
}

/// Deflate `raw` with the default level. Deterministic for a given input,
/// so the post path reproduces the exact bytes the planning pass measured.
pub fn compress(raw: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(raw)
        .and_then(|_| encoder.finish())
        .context("deflating segment body")
}

/// Deflate `raw`; keep it only when it beats `threshold × raw len`.
pub fn maybe_compress(raw: &[u8], threshold: f64) -> Option<Vec<u8>> {
    if raw.is_empty() {
        return None;
    }
    let compressed = compress(raw).ok()?;
    if (compressed.len() as f64) < raw.len() as f64 * threshold {
        Some(compressed)
    } else {
        None
    }
}

/// Inflate a deflated segment body.
pub fn decompress(body: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = DeflateDecoder::new(body);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .context("inflating segment body")?;
    Ok(out)
}

/// Read one planned slice from a file.
pub fn read_segment(path: &Path, offset: u64, size: u64) -> Result<Vec<u8>> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    f.seek(SeekFrom::Start(offset))
        .with_context(|| format!("seek {} in {}", offset, path.display()))?;
    let mut buf = vec![0u8; size as usize];
    f.read_exact(&mut buf)
        .with_context(|| format!("short read at {} in {}", offset, path.display()))?;
    Ok(buf)
}

/// Iterator yielding one [`PreparedSegment`] at a time; memory stays bounded
/// by a single segment regardless of file size.
pub struct SegmentReader {
    file: File,
    plan: std::vec::IntoIter<PlannedSegment>,
    threshold: f64,
}

impl SegmentReader {
    pub fn open(path: &Path, segment_size: usize, threshold: f64) -> Result<Self> {
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let total = file
            .metadata()
            .with_context(|| format!("stat {}", path.display()))?
            .len();
        Ok(Self {
            file,
            plan: plan_segments(total, segment_size).into_iter(),
            threshold,
        })
    }
}

impl Iterator for SegmentReader {
    type Item = Result<PreparedSegment>;

    fn next(&mut self) -> Option<Self::Item> {
        let planned = self.plan.next()?;
        let mut raw = vec![0u8; planned.size as usize];
        if let Err(e) = self
            .file
            .seek(SeekFrom::Start(planned.offset))
            .and_then(|_| self.file.read_exact(&mut raw))
        {
            return Some(Err(e).context(format!("reading segment {}", planned.index)));
        }
        let plaintext_hash = sha256_hex(&raw);
        let (compressed, body) = match maybe_compress(&raw, self.threshold) {
            Some(c) => (true, c),
            None => (false, raw),
        };
        Some(Ok(PreparedSegment {
            index: planned.index,
            offset: planned.offset,
            size: planned.size,
            plaintext_hash,
            compressed,
            body,
        }))
    }
}
