//! FCPXML 1.11 marker export
//!
//! Renders one merged record as an FCPXML library containing a single
//! project whose spine holds the source clip with one marker per segment.
//! Marker flavor encodes the segment's tags: glitches become completed
//! to-do markers, strong segments open to-do markers, and revelations and
//! ruptures become chapter markers. Everything else is a standard marker.

use super::ExportError;
use crate::models::{CategoryTag, InterestTag, MergedRecord, Segment};
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::path::Path;
use tapedeck_common::Timecode;
use tracing::info;

/// Frame rate used for rational time values. VHS-era PAL sources, and the
/// 1-second segment resolution makes finer rates moot.
const FPS: u32 = 25;

/// Rational time attribute value, e.g. `"90000/25s"` for one hour
fn rational(tc: Timecode) -> String {
    format!("{}/{}s", tc.as_secs() * FPS, FPS)
}

fn rational_secs(secs: u32) -> String {
    format!("{}/{}s", secs * FPS, FPS)
}

/// Marker display text: what was said first, then what was seen
fn marker_note(segment: &Segment) -> String {
    let mut parts: Vec<String> = Vec::new();
    if let Some(t) = &segment.transcription {
        if !t.is_empty() {
            parts.push(format!("\u{201c}{}\u{201d}", t));
        }
    }
    if !segment.note.is_empty() {
        parts.push(segment.note.clone());
    }
    if !segment.description.is_empty() {
        parts.push(segment.description.clone());
    }
    if let Some(b) = &segment.blind_note {
        if !b.is_empty() {
            parts.push(format!("[blind: {}]", b));
        }
    }
    if let Some(e) = &segment.escalation_note {
        if !e.is_empty() {
            parts.push(format!("[deep: {}]", e));
        }
    }
    parts.join(" | ")
}

/// Render the record and write it to `out`
pub fn write_fcpxml(record: &MergedRecord, out: &Path) -> Result<(), ExportError> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    let xml_err = |e: quick_xml::Error| ExportError::Xml(e.to_string());

    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(xml_err)?;
    writer
        .write_event(Event::DocType(BytesText::from_escaped("fcpxml")))
        .map_err(xml_err)?;

    let mut fcpxml = BytesStart::new("fcpxml");
    fcpxml.push_attribute(("version", "1.11"));
    writer.write_event(Event::Start(fcpxml)).map_err(xml_err)?;

    write_resources(&mut writer, record).map_err(xml_err)?;
    write_library(&mut writer, record).map_err(xml_err)?;

    writer
        .write_event(Event::End(BytesEnd::new("fcpxml")))
        .map_err(xml_err)?;

    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(out, writer.into_inner())?;
    info!(item = %record.item, markers = record.segments.len(), out = %out.display(), "FCPXML written");
    Ok(())
}

fn clip_duration(record: &MergedRecord) -> u32 {
    record
        .segments
        .iter()
        .map(|s| s.end.as_secs())
        .max()
        .unwrap_or(0)
        .max(1)
}

fn write_resources(
    writer: &mut Writer<Vec<u8>>,
    record: &MergedRecord,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new("resources")))?;

    let mut format = BytesStart::new("format");
    format.push_attribute(("id", "r1"));
    format.push_attribute(("name", "FFVideoFormat576p25"));
    format.push_attribute(("frameDuration", format!("1/{}s", FPS).as_str()));
    writer.write_event(Event::Empty(format))?;

    let mut asset = BytesStart::new("asset");
    asset.push_attribute(("id", "r2"));
    asset.push_attribute(("name", record.item.as_str()));
    asset.push_attribute(("start", "0s"));
    asset.push_attribute(("duration", rational_secs(clip_duration(record)).as_str()));
    asset.push_attribute(("format", "r1"));
    asset.push_attribute(("hasVideo", "1"));
    asset.push_attribute(("hasAudio", "1"));
    writer.write_event(Event::Start(asset))?;

    let mut rep = BytesStart::new("media-rep");
    rep.push_attribute(("kind", "original-media"));
    let src = format!("file://{}", record.source_path);
    rep.push_attribute(("src", src.as_str()));
    writer.write_event(Event::Empty(rep))?;

    writer.write_event(Event::End(BytesEnd::new("asset")))?;
    writer.write_event(Event::End(BytesEnd::new("resources")))?;
    Ok(())
}

fn write_library(
    writer: &mut Writer<Vec<u8>>,
    record: &MergedRecord,
) -> Result<(), quick_xml::Error> {
    writer.write_event(Event::Start(BytesStart::new("library")))?;

    let mut event = BytesStart::new("event");
    event.push_attribute(("name", "Tapedeck Rushes"));
    writer.write_event(Event::Start(event))?;

    let mut project = BytesStart::new("project");
    project.push_attribute(("name", record.item.as_str()));
    writer.write_event(Event::Start(project))?;

    let duration = rational_secs(clip_duration(record));
    let mut sequence = BytesStart::new("sequence");
    sequence.push_attribute(("format", "r1"));
    sequence.push_attribute(("duration", duration.as_str()));
    writer.write_event(Event::Start(sequence))?;
    writer.write_event(Event::Start(BytesStart::new("spine")))?;

    let mut clip = BytesStart::new("asset-clip");
    clip.push_attribute(("ref", "r2"));
    clip.push_attribute(("name", record.item.as_str()));
    clip.push_attribute(("start", "0s"));
    clip.push_attribute(("duration", duration.as_str()));
    writer.write_event(Event::Start(clip))?;

    for segment in &record.segments {
        write_marker(writer, segment)?;
    }

    writer.write_event(Event::End(BytesEnd::new("asset-clip")))?;
    writer.write_event(Event::End(BytesEnd::new("spine")))?;
    writer.write_event(Event::End(BytesEnd::new("sequence")))?;
    writer.write_event(Event::End(BytesEnd::new("project")))?;
    writer.write_event(Event::End(BytesEnd::new("event")))?;
    writer.write_event(Event::End(BytesEnd::new("library")))?;
    Ok(())
}

fn write_marker(writer: &mut Writer<Vec<u8>>, segment: &Segment) -> Result<(), quick_xml::Error> {
    let is_chapter = matches!(
        segment.category,
        CategoryTag::Revelation | CategoryTag::Rupture
    );
    let name = if is_chapter { "chapter-marker" } else { "marker" };

    let mut marker = BytesStart::new(name);
    marker.push_attribute(("start", rational(segment.start).as_str()));
    let duration = (segment.end.as_secs().saturating_sub(segment.start.as_secs())).max(1);
    marker.push_attribute(("duration", rational_secs(duration).as_str()));
    marker.push_attribute(("value", marker_note(segment).as_str()));

    if !is_chapter {
        if segment.category == CategoryTag::Glitch {
            marker.push_attribute(("completed", "1"));
        } else if segment.interest == InterestTag::Strong {
            marker.push_attribute(("completed", "0"));
        }
    }

    writer.write_event(Event::Empty(marker))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ItemId, PassOrigin};

    fn seg(start: u32, end: u32, category: CategoryTag, interest: InterestTag) -> Segment {
        Segment {
            start: Timecode::from_secs(start),
            end: Timecode::from_secs(end),
            description: "desc".to_string(),
            note: String::new(),
            transcription: None,
            category,
            interest,
            themes: vec![],
            blind_note: None,
            escalation_note: None,
            origin: PassOrigin::Framed,
        }
    }

    fn record(segments: Vec<Segment>) -> MergedRecord {
        MergedRecord {
            item: ItemId::new("tape_01.mp4"),
            source_path: "/footage/tape_01.mp4".to_string(),
            profile: None,
            segments,
            observations: None,
            model: None,
        }
    }

    fn render(record: &MergedRecord) -> String {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out.fcpxml");
        write_fcpxml(record, &out).unwrap();
        std::fs::read_to_string(&out).unwrap()
    }

    #[test]
    fn test_document_shape() {
        let xml = render(&record(vec![seg(
            10,
            20,
            CategoryTag::Mundane,
            InterestTag::Standard,
        )]));
        assert!(xml.contains("<fcpxml version=\"1.11\">"));
        assert!(xml.contains("<asset-clip ref=\"r2\""));
        assert!(xml.contains("marker start=\"250/25s\" duration=\"250/25s\""));
    }

    #[test]
    fn test_marker_flavors() {
        let xml = render(&record(vec![
            seg(0, 5, CategoryTag::Glitch, InterestTag::Standard),
            seg(10, 15, CategoryTag::Mundane, InterestTag::Strong),
            seg(20, 25, CategoryTag::Revelation, InterestTag::Standard),
            seg(30, 35, CategoryTag::Mundane, InterestTag::Standard),
        ]));
        assert!(xml.contains("completed=\"1\""));
        assert!(xml.contains("completed=\"0\""));
        assert!(xml.contains("<chapter-marker"));
    }

    #[test]
    fn test_point_marker_gets_one_frame_second() {
        let xml = render(&record(vec![seg(
            60,
            60,
            CategoryTag::Detail,
            InterestTag::Standard,
        )]));
        assert!(xml.contains("duration=\"25/25s\""));
    }

    #[test]
    fn test_note_text_escaped() {
        let mut s = seg(0, 10, CategoryTag::Mundane, InterestTag::Standard);
        s.description = "cables & <wires>".to_string();
        let xml = render(&record(vec![s]));
        assert!(xml.contains("cables &amp; &lt;wires&gt;"));
    }
}
