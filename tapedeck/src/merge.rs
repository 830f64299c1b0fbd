//! Deterministic fusion of analysis passes
//!
//! Two fusion steps happen here. Chunked footage first has its per-chunk
//! replies stitched back into one pass, with overlap-region duplicates
//! dropped. Then the framed deep pass and the optional blind pass are merged
//! into the item's record: the framed pass is authoritative for structural
//! fields, and an overlapping blind segment contributes only its impression
//! as a supplementary note. The merge is a pure function of its inputs, so
//! re-running it yields an identical record.

use crate::models::{AnalysisPass, ItemId, MergedRecord, PassOrigin, Segment};
use tracing::debug;

/// Stitch per-chunk passes (with their chunk offsets, in source order) into
/// one pass covering the whole item.
///
/// Segment timecodes in a chunk reply are relative to the chunk, so each is
/// shifted by the chunk's offset. Where chunks overlap, a segment restating
/// one already seen at the same start timecode is a duplicate and dropped.
pub fn merge_chunks(chunk_passes: Vec<(u32, AnalysisPass)>) -> AnalysisPass {
    let mut profile = None;
    let mut observations = None;
    let mut segments: Vec<Segment> = Vec::new();

    for (offset_secs, pass) in chunk_passes {
        if profile.is_none() {
            profile = pass.profile;
        }
        if observations.is_none() {
            observations = pass.observations;
        }
        for segment in pass.segments {
            let mut shifted = segment;
            shifted.start = shifted.start.offset_by(offset_secs);
            shifted.end = shifted.end.offset_by(offset_secs);
            if segments.iter().any(|s| s.start == shifted.start) {
                debug!(start = %shifted.start, "Dropping duplicate chunk-overlap segment");
                continue;
            }
            segments.push(shifted);
        }
    }

    segments.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)));
    AnalysisPass {
        profile,
        segments,
        observations,
    }
}

/// Merge the authoritative framed pass with an optional blind pass into the
/// item record.
pub fn merge_passes(
    item: &ItemId,
    source_path: String,
    framed: AnalysisPass,
    blind: Option<AnalysisPass>,
    model: Option<String>,
) -> MergedRecord {
    let mut segments: Vec<Segment> = framed.segments;
    segments.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)));

    if let Some(blind_pass) = blind {
        let mut blind_only: Vec<Segment> = Vec::new();
        let mut blind_segments = blind_pass.segments;
        blind_segments.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)));

        for blind_seg in blind_segments {
            // First overlapping framed segment absorbs the impression
            match segments.iter_mut().find(|s| s.overlaps(&blind_seg)) {
                Some(framed_seg) => {
                    let impression = impression_text(&blind_seg);
                    if !impression.is_empty() {
                        framed_seg.blind_note = Some(match framed_seg.blind_note.take() {
                            Some(existing) => format!("{} | {}", existing, impression),
                            None => impression,
                        });
                    }
                    framed_seg.origin = PassOrigin::Both;
                }
                None => {
                    let mut seg = blind_seg;
                    seg.origin = PassOrigin::Blind;
                    blind_only.push(seg);
                }
            }
        }

        segments.extend(blind_only);
        segments.sort_by(|a, b| (a.start, a.end).cmp(&(b.start, b.end)));
    }

    MergedRecord {
        item: item.clone(),
        source_path,
        profile: framed.profile,
        segments,
        observations: framed.observations,
        model,
    }
}

/// What the blind pass has to say about a moment, as one line
fn impression_text(segment: &Segment) -> String {
    let mut parts = Vec::new();
    if !segment.description.is_empty() {
        parts.push(segment.description.as_str());
    }
    if !segment.note.is_empty() {
        parts.push(segment.note.as_str());
    }
    parts.join(" ")
}
