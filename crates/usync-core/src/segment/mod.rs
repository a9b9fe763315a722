//! Segmentation: fixed-size file slicing, optional per-segment compression,
//! replica generation, and pack containers.

pub mod pack;
mod split;
mod wire;

pub use pack::{decode_pack, encode_pack, plan_optimized, plan_sequential, EncodedPack, PackMember};
pub use split::{
    compress, decompress, maybe_compress, plan_segments, read_segment, PlannedSegment,
    PreparedSegment, SegmentReader,
};
pub use wire::{decode_segment, encode_segment, SegmentWire, SEGMENT_MAGIC, SEGMENT_WIRE_VERSION};

use anyhow::Result;
use std::path::Path;

use crate::obfuscate;
use crate::store::{segment_row_id, NewSegment};

/// Segment one file on disk into store rows, including `redundancy_level`
/// replicas per segment.
///
/// Replicas share the original's plaintext hash and compression decision but
/// draw independent wire subjects (and later, independent Message-IDs), so
/// any single replica recovers the segment. The file is read once.
pub fn build_segment_rows(
    path: &Path,
    file_id: i64,
    segment_size: usize,
    compression_threshold: f64,
    redundancy_level: u8,
    newsgroup: &str,
) -> Result<Vec<NewSegment>> {
    let mut rows = Vec::new();
    for prepared in SegmentReader::open(path, segment_size, compression_threshold)? {
        let prepared = prepared?;
        for replica in 0..=redundancy_level as i64 {
            rows.push(NewSegment {
                segment_id: segment_row_id(file_id, prepared.index as i64, replica),
                file_id,
                segment_index: prepared.index as i64,
                offset: prepared.offset as i64,
                size: prepared.size as i64,
                plaintext_hash: prepared.plaintext_hash.clone(),
                replica_index: replica,
                compressed: prepared.compressed,
                wire_subject: obfuscate::wire_subject(),
                newsgroup: newsgroup.to_string(),
            });
        }
    }
    Ok(rows)
}
