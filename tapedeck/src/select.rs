//! Escalation selection
//!
//! Picks which strong segments earn a second look from the costly deep
//! tier. Selection is greedy in timecode order: earlier strong moments are
//! kept until the deep tier's single-call footage budget is spent. Greedy
//! ordering keeps the choice reproducible across runs.

use crate::models::{InterestTag, Segment};
use std::time::Duration;
use tracing::debug;

/// Indices of segments to escalate, within the deep-tier footage budget
pub fn select_for_escalation(segments: &[Segment], budget: Duration) -> Vec<usize> {
    let mut selected = Vec::new();
    let mut spent = Duration::ZERO;

    for (index, segment) in segments.iter().enumerate() {
        if segment.interest != InterestTag::Strong {
            continue;
        }
        let cost = segment.duration();
        if spent + cost > budget {
            debug!(
                index,
                start = %segment.start,
                "Deep-tier budget exhausted, stopping escalation selection"
            );
            break;
        }
        spent += cost;
        selected.push(index);
    }

    selected
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CategoryTag, PassOrigin};
    use tapedeck_common::Timecode;

    fn seg(start: u32, end: u32, interest: InterestTag) -> Segment {
        Segment {
            start: Timecode::from_secs(start),
            end: Timecode::from_secs(end),
            description: String::new(),
            note: String::new(),
            transcription: None,
            category: CategoryTag::Mundane,
            interest,
            themes: vec![],
            blind_note: None,
            escalation_note: None,
            origin: PassOrigin::Framed,
        }
    }

    #[test]
    fn test_only_strong_segments_selected() {
        let segments = vec![
            seg(0, 60, InterestTag::Standard),
            seg(100, 160, InterestTag::Strong),
            seg(200, 260, InterestTag::Weak),
            seg(300, 360, InterestTag::Strong),
        ];
        let picked = select_for_escalation(&segments, Duration::from_secs(3600));
        assert_eq!(picked, vec![1, 3]);
    }

    #[test]
    fn test_budget_never_exceeded() {
        let segments = vec![
            seg(0, 100, InterestTag::Strong),
            seg(200, 300, InterestTag::Strong),
            seg(400, 500, InterestTag::Strong),
        ];
        let picked = select_for_escalation(&segments, Duration::from_secs(250));
        assert_eq!(picked, vec![0, 1]);

        let total: Duration = picked.iter().map(|&i| segments[i].duration()).sum();
        assert!(total <= Duration::from_secs(250));
    }

    #[test]
    fn test_earliest_strong_segments_win() {
        let segments = vec![
            seg(0, 200, InterestTag::Strong),
            seg(300, 320, InterestTag::Strong),
        ];
        // Budget fits only the first; the shorter later one is not preferred
        let picked = select_for_escalation(&segments, Duration::from_secs(210));
        assert_eq!(picked, vec![0]);
    }

    #[test]
    fn test_empty_and_zero_budget() {
        assert!(select_for_escalation(&[], Duration::from_secs(100)).is_empty());
        let segments = vec![seg(0, 60, InterestTag::Strong)];
        assert!(select_for_escalation(&segments, Duration::ZERO).is_empty());
    }
}
