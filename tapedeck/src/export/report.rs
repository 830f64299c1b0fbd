//! Markdown rushes log
//!
//! A per-item viewing log an editor can read away from the NLE: tech sheet,
//! segment timeline, everything that was said, the strong moments, and the
//! themes that recur. Corpus synthesis lands in its own document.

use super::ExportError;
use crate::models::{InterestTag, MergedRecord};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;
use tracing::info;

/// Render the rushes log for one record
pub fn render_report(record: &MergedRecord) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Rushes log: {}\n", record.item);
    let _ = writeln!(out, "Source: `{}`\n", record.source_path);

    if let Some(profile) = &record.profile {
        let _ = writeln!(out, "## Tech sheet\n");
        let mut row = |label: &str, value: &Option<String>| {
            if let Some(v) = value {
                let _ = writeln!(out, "- **{}**: {}", label, v);
            }
        };
        row("Context", &profile.context);
        row("Period", &profile.period);
        row("Location", &profile.location);
        row("Image", &profile.image_quality);
        row("Audio", &profile.audio_quality);
        if !profile.people.is_empty() {
            let _ = writeln!(out, "- **People**: {}", profile.people.join(", "));
        }
        let _ = writeln!(out);
    }

    let _ = writeln!(out, "## Timeline\n");
    let _ = writeln!(out, "| Start | End | Category | Interest | Description |");
    let _ = writeln!(out, "|-------|-----|----------|----------|-------------|");
    for seg in &record.segments {
        let _ = writeln!(
            out,
            "| {} | {} | {:?} | {:?} | {} |",
            seg.start,
            seg.end,
            seg.category,
            seg.interest,
            table_cell(&seg.description)
        );
    }
    let _ = writeln!(out);

    let spoken: Vec<_> = record
        .segments
        .iter()
        .filter_map(|s| s.transcription.as_deref().map(|t| (s.start, t)))
        .filter(|(_, t)| !t.is_empty())
        .collect();
    if !spoken.is_empty() {
        let _ = writeln!(out, "## Spoken\n");
        for (start, text) in spoken {
            let _ = writeln!(out, "- `{}` \u{201c}{}\u{201d}", start, text);
        }
        let _ = writeln!(out);
    }

    let strong: Vec<_> = record
        .segments
        .iter()
        .filter(|s| s.interest == InterestTag::Strong)
        .collect();
    if !strong.is_empty() {
        let _ = writeln!(out, "## Strong moments\n");
        for seg in strong {
            let _ = writeln!(out, "- `{}` {}", seg.start, seg.description);
            if !seg.note.is_empty() {
                let _ = writeln!(out, "  - {}", seg.note);
            }
            if let Some(b) = &seg.blind_note {
                let _ = writeln!(out, "  - Blind pass: {}", b);
            }
            if let Some(e) = &seg.escalation_note {
                let _ = writeln!(out, "  - Deep pass: {}", e);
            }
        }
        let _ = writeln!(out);
    }

    let mut themes: BTreeMap<&str, usize> = BTreeMap::new();
    for seg in &record.segments {
        for theme in &seg.themes {
            *themes.entry(theme.as_str()).or_default() += 1;
        }
    }
    if !themes.is_empty() {
        let _ = writeln!(out, "## Themes\n");
        for (theme, count) in themes {
            let _ = writeln!(out, "- {} ({})", theme, count);
        }
        let _ = writeln!(out);
    }

    if let Some(obs) = &record.observations {
        let _ = writeln!(out, "## Observations\n");
        if let Some(v) = &obs.biographical_value {
            let _ = writeln!(out, "**Biographical value.** {}\n", v);
        }
        if let Some(v) = &obs.narrative_arcs {
            let _ = writeln!(out, "**Narrative arcs.** {}\n", v);
        }
        if let Some(v) = &obs.editor_recommendation {
            let _ = writeln!(out, "**For the edit.** {}\n", v);
        }
    }

    out
}

fn table_cell(text: &str) -> String {
    text.replace('|', "\\|").replace('\n', " ")
}

pub fn write_report(record: &MergedRecord, out: &Path) -> Result<(), ExportError> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out, render_report(record))?;
    info!(item = %record.item, out = %out.display(), "Rushes log written");
    Ok(())
}

/// Write the corpus synthesis document
pub fn write_synthesis(text: &str, out: &Path) -> Result<(), ExportError> {
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = if text.starts_with('#') {
        text.to_string()
    } else {
        format!("# Corpus synthesis\n\n{}", text)
    };
    std::fs::write(out, body)?;
    info!(out = %out.display(), "Synthesis written");
    Ok(())
}
