//! Pure planning helpers for the step executor: deriving the temporary
//! clone file's shape from its source, and building the sparse
//! `CloneSegmentMap` of chunks that actually need to be materialized.
//! Nothing here does I/O; `executor` drives these against the ports and
//! fills in `chunk_id_info` once segments are allocated.

use std::collections::BTreeMap;

use snapclone_core::Location;

use crate::ports::{ChunkIdInfo, ChunkIndexData, FileInfo, SnapshotInfo};

/// Shape of the temporary clone file to be created, derived from its
/// source.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedFile {
    pub length: u64,
    pub chunk_size: u32,
    pub segment_size: u64,
    pub seqnum: u64,
}

/// A clone from a snapshot starts at `initial_seq_num`; a recover from
/// a snapshot bumps the pre-existing destination's seqnum by one — the
/// caller resolves which `seqnum` applies before calling this.
pub fn plan_from_snapshot(snapshot: &SnapshotInfo, seqnum: u64) -> PlannedFile {
    PlannedFile {
        length: snapshot.file_length,
        chunk_size: snapshot.chunk_size,
        segment_size: snapshot.segment_size,
        seqnum,
    }
}

/// A file-sourced clone or recover always starts the temp file at
/// `initial_seq_num` — unlike the snapshot case, it's never bumped for
/// file-sourced recovers, since the source is a live volume rather than
/// a versioned snapshot.
pub fn plan_from_file(source: &FileInfo, initial_seq_num: u64) -> PlannedFile {
    PlannedFile {
        length: source.length,
        chunk_size: source.chunk_size,
        segment_size: source.segment_size,
        seqnum: initial_seq_num,
    }
}

/// One chunk's worth of work: where its data comes from, what seqnum
/// to stamp it with, and (once the meta refresh has run) which
/// physical chunk it was allocated to.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPlan {
    pub location: Location,
    pub seq_num: u64,
    pub chunk_id_info: Option<ChunkIdInfo>,
}

/// `chunkIndexWithinSegment -> ChunkPlan`.
pub type SegmentPlan = BTreeMap<u64, ChunkPlan>;

/// `segmentIndex -> SegmentPlan`. Only segments with at least one
/// chunk to materialize are present — a `BTreeMap` so iteration order
/// is the segment order, which both progress interpolation and restart
/// determinism rely on.
pub type CloneSegmentMap = BTreeMap<u64, SegmentPlan>;

/// Offsets (inclusive start, exclusive end) of every segment covering
/// `[0, length)`, in order. The final segment is truncated at `length`
/// if it doesn't divide evenly.
pub fn segment_ranges(length: u64, segment_size: u64) -> Vec<(u64, u64)> {
    if segment_size == 0 || length == 0 {
        return Vec::new();
    }
    let mut ranges = Vec::new();
    let mut offset = 0;
    while offset < length {
        let end = (offset + segment_size).min(length);
        ranges.push((offset, end));
        offset += segment_size;
    }
    ranges
}

/// Builds the sparse segment map for a snapshot source
/// (`BuildFileInfoFromSnapshot`'s segInfos loop): every chunk index
/// present in the snapshot's chunk index data becomes one entry, keyed
/// by `(segmentIndex, chunkIndexWithinSegment)`. A recover stamps each
/// chunk with the snapshot chunk's own seqnum; a clone stamps every
/// chunk with `initial_seq_num`.
pub fn build_segment_map_from_snapshot(
    segment_size: u64,
    chunk_size: u32,
    chunk_index_data: &ChunkIndexData,
    is_recover: bool,
    initial_seq_num: u64,
) -> CloneSegmentMap {
    let chunks_per_segment = (segment_size / chunk_size as u64).max(1);
    let mut map = CloneSegmentMap::new();
    for (&chunk_index, (s3_key, entry)) in chunk_index_data {
        let segment_index = chunk_index / chunks_per_segment;
        let chunk_in_segment = chunk_index % chunks_per_segment;
        let seq_num = if is_recover { entry.chunk_seq_num } else { initial_seq_num };
        map.entry(segment_index).or_default().insert(
            chunk_in_segment,
            ChunkPlan {
                location: Location::s3(s3_key.clone()),
                seq_num,
                chunk_id_info: None,
            },
        );
    }
    map
}

/// One segment's worth of allocated chunks for a file source: `None`
/// if the segment has no chunks allocated at all. `chunk_id_info` is
/// filled in directly since the non-forcing allocation lookup already
/// returns the real allocation — a file source never needs the
/// force-allocate pass a snapshot source does.
pub fn segment_plan_from_file_chunks(
    chunks: &[ChunkIdInfo],
    segment_start: u64,
    chunk_size: u32,
    destination: &str,
    initial_seq_num: u64,
) -> Option<SegmentPlan> {
    if chunks.is_empty() {
        return None;
    }
    let mut plan = SegmentPlan::new();
    for (j, chunk) in chunks.iter().enumerate() {
        let offset = segment_start + j as u64 * chunk_size as u64;
        plan.insert(
            j as u64,
            ChunkPlan {
                location: Location::curve(destination, offset),
                seq_num: initial_seq_num,
                chunk_id_info: Some(*chunk),
            },
        );
    }
    Some(plan)
}
