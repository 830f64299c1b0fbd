//! Core data model: work items, phases, segments, merged records

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tapedeck_common::Timecode;

/// Stable identifier for a work item, derived from the source file name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemId(String);

/// Reserved identifier for corpus-level work (synthesis phase)
pub const CORPUS_ITEM: &str = "__corpus__";

impl ItemId {
    pub fn new(name: impl Into<String>) -> Self {
        ItemId(name.into())
    }

    /// The reserved corpus-level pseudo-item
    pub fn corpus() -> Self {
        ItemId(CORPUS_ITEM.to_string())
    }

    pub fn is_corpus(&self) -> bool {
        self.0 == CORPUS_ITEM
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One source video in the batch. Identity is immutable; phase completion
/// lives in the checkpoint store, never here.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkItem {
    pub id: ItemId,
    pub path: PathBuf,
}

impl WorkItem {
    pub fn new(path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());
        WorkItem {
            id: ItemId::new(name),
            path,
        }
    }

    /// File stem used for naming per-item artifacts
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| self.id.to_string())
    }
}

/// Pipeline phases, in dependency order.
///
/// Phases within an item are strictly sequential; different items progress
/// in parallel. `Synthesis` is corpus-level and checkpointed under the
/// reserved corpus item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    /// Local proxy transcode (ffmpeg): 480p, 1 fps, burnt-in timecode
    Proxy,
    /// Cheap remote pre-scan of a short sample (granularity, profile)
    Prescan,
    /// Optional unframed pass: no analytical framework supplied
    Blind,
    /// Framed deep analysis under the full analytical instruction payload
    Deep,
    /// Optional escalation of selected strong segments to the deep tier
    Escalate,
    /// Local export: FCPXML markers + Markdown rushes log
    Export,
    /// Optional corpus-level synthesis across all analyzed items
    Synthesis,
}

impl Phase {
    pub const ALL: [Phase; 7] = [
        Phase::Proxy,
        Phase::Prescan,
        Phase::Blind,
        Phase::Deep,
        Phase::Escalate,
        Phase::Export,
        Phase::Synthesis,
    ];

    /// Per-item phases, excluding corpus-level synthesis
    pub const PER_ITEM: [Phase; 6] = [
        Phase::Proxy,
        Phase::Prescan,
        Phase::Blind,
        Phase::Deep,
        Phase::Escalate,
        Phase::Export,
    ];

    pub fn number(&self) -> u8 {
        match self {
            Phase::Proxy => 0,
            Phase::Prescan => 1,
            Phase::Blind => 2,
            Phase::Deep => 3,
            Phase::Escalate => 4,
            Phase::Export => 5,
            Phase::Synthesis => 6,
        }
    }

    pub fn from_number(n: u8) -> Option<Phase> {
        Phase::ALL.iter().copied().find(|p| p.number() == n)
    }

    /// Fixed prerequisite set: this phase may run only when every listed
    /// phase is `Succeeded` for the same item.
    pub fn prerequisites(&self) -> &'static [Phase] {
        match self {
            Phase::Proxy => &[],
            Phase::Prescan => &[Phase::Proxy],
            Phase::Blind => &[Phase::Proxy],
            Phase::Deep => &[Phase::Proxy, Phase::Prescan],
            Phase::Escalate => &[Phase::Deep],
            Phase::Export => &[Phase::Deep],
            // Corpus-level: gated on per-item Deep results by the orchestrator
            Phase::Synthesis => &[],
        }
    }

    /// Optional phases are skipped (not failed) when disabled by options
    pub fn is_optional(&self) -> bool {
        matches!(self, Phase::Blind | Phase::Escalate | Phase::Synthesis)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Proxy => "proxy",
            Phase::Prescan => "prescan",
            Phase::Blind => "blind",
            Phase::Deep => "deep",
            Phase::Escalate => "escalate",
            Phase::Export => "export",
            Phase::Synthesis => "synthesis",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Phase completion status as recorded in the checkpoint store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl PhaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseStatus::Pending => "pending",
            PhaseStatus::Running => "running",
            PhaseStatus::Succeeded => "succeeded",
            PhaseStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<PhaseStatus> {
        match s {
            "pending" => Some(PhaseStatus::Pending),
            "running" => Some(PhaseStatus::Running),
            "succeeded" => Some(PhaseStatus::Succeeded),
            "failed" => Some(PhaseStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PhaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Category tag on a segment; drives marker kind and color in export
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CategoryTag {
    Revelation,
    Rupture,
    Intimate,
    Glitch,
    Detail,
    Transition,
    Mundane,
    /// Any tag outside the instruction schema; exported as a standard marker
    #[serde(other)]
    Other,
}

/// Confidence/interest tag used by the escalation selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InterestTag {
    Strong,
    Weak,
    #[serde(other)]
    Standard,
}

/// Which pass contributed a merged segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassOrigin {
    /// Framed deep-analysis pass only
    Framed,
    /// Unframed blind pass only
    Blind,
    /// Overlap: framed structural fields + blind supplementary note
    Both,
}

impl Default for PassOrigin {
    fn default() -> Self {
        PassOrigin::Framed
    }
}

/// One timestamped observation unit within an analysis pass.
///
/// Immutable once written by a pass; the merger builds new segments rather
/// than mutating inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: Timecode,
    pub end: Timecode,
    /// Free-text scene description (structural field)
    #[serde(default)]
    pub description: String,
    /// Behavioral/editorial annotation
    #[serde(default)]
    pub note: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transcription: Option<String>,
    #[serde(default = "default_category")]
    pub category: CategoryTag,
    #[serde(default = "default_interest")]
    pub interest: InterestTag,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub themes: Vec<String>,
    /// Supplementary context from the unframed pass ("independent first
    /// impression"), attached by the merger on overlap
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blind_note: Option<String>,
    /// Higher-tier re-analysis note, attached by the escalation phase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_note: Option<String>,
    #[serde(default)]
    pub origin: PassOrigin,
}

fn default_category() -> CategoryTag {
    CategoryTag::Other
}

fn default_interest() -> InterestTag {
    InterestTag::Standard
}

impl Segment {
    /// Segment duration; a point-in-time observation counts as one second
    pub fn duration(&self) -> Duration {
        let span = self.start.span_to(self.end);
        if span.is_zero() {
            Duration::from_secs(1)
        } else {
            span
        }
    }

    /// Time overlap test. Segments sharing only an endpoint do not overlap.
    pub fn overlaps(&self, other: &Segment) -> bool {
        self.start < other.end && other.start < self.end
            || self.start == other.start
    }
}

/// Item profile returned by the pre-scan phase
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VideoProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub people: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_quality: Option<String>,
    /// Suggested segmentation granularity for the deep pass, in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommended_granularity_secs: Option<u32>,
}

/// Corpus-facing observations produced alongside segments by a pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalObservations {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biographical_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative_arcs: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor_recommendation: Option<String>,
}

/// Structured payload of a single analysis pass (after chunk merge)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisPass {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<VideoProfile>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<GlobalObservations>,
}

/// Merged, ordered analysis record for one item.
///
/// Invariant: segments are totally ordered by start timecode and
/// non-overlapping after merge resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedRecord {
    pub item: ItemId,
    pub source_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<VideoProfile>,
    pub segments: Vec<Segment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observations: Option<GlobalObservations>,
    /// Model tier that produced the authoritative pass
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}
