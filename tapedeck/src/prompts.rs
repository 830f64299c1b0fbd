//! Instruction payloads for the analysis passes
//!
//! The payloads are the editorial contract with the remote model: what to
//! look for, how to segment, and the exact JSON shape to reply with. The
//! blind pass deliberately receives no analytical framework so its reading
//! stays uncontaminated by the framed pass's categories.

use crate::models::VideoProfile;

const PRESCAN: &str = r#"You are watching a short sample from a digitized home video tape.
Report on the footage as a whole, not on individual moments.

Reply with a single JSON object:
{
  "profile": {
    "context": "one-sentence situation summary",
    "people": ["visible or named people"],
    "period": "estimated era, e.g. 'mid 1990s'",
    "location": "where this seems to take place",
    "image_quality": "one line on picture condition",
    "audio_quality": "one line on sound condition",
    "recommended_granularity_secs": 30
  }
}

Pick recommended_granularity_secs between 10 (dense, eventful footage)
and 120 (long static scenes)."#;

const BLIND: &str = r#"Watch this footage and note whatever strikes you, in your own terms.
Do not classify. Do not look for anything in particular. Simply record the
moments that hold your attention and say why, plainly.

Reply with a single JSON object:
{
  "segments": [
    {
      "start": "HH:MM:SS",
      "end": "HH:MM:SS",
      "description": "what happens",
      "note": "why this moment holds attention"
    }
  ]
}

Timecodes are burnt into the picture. Use them."#;

const DEEP: &str = r#"You are logging digitized home-video rushes for a documentary editor.
Segment the footage completely: every stretch belongs to exactly one segment.

For each segment give:
- start, end: timecodes as burnt into the picture (HH:MM:SS)
- description: what is in frame and what happens
- note: behavioral or editorial observation, if any
- transcription: speech, verbatim, when intelligible
- category: one of revelation, rupture, intimate, glitch, detail,
  transition, mundane
- interest: strong, standard, or weak
- themes: recurring motifs this segment touches

Category guide:
- revelation: something is said or shown that reframes what came before
- rupture: the social temperature changes sharply
- intimate: unguarded closeness, a moment not performed for the camera
- glitch: tape damage, dropouts, tracking errors
- detail: an object, gesture, or texture worth an insert shot
- transition: camera moves between scenes, dead time
- mundane: ordinary footage with no particular charge

Also reply with global observations.

Reply with a single JSON object:
{
  "segments": [ ... ],
  "observations": {
    "biographical_value": "...",
    "narrative_arcs": "...",
    "editor_recommendation": "..."
  }
}"#;

const ESCALATION: &str = r#"These moments were flagged strong on a first pass. Look again, closely.
For each listed span, report what a first viewing would miss: glances,
body language, what is almost said, what the camera operator reacts to.

Reply with a single JSON object:
{
  "segments": [
    { "start": "HH:MM:SS", "end": "HH:MM:SS", "note": "close reading" }
  ]
}

Use the listed spans' timecodes exactly."#;

const SYNTHESIS: &str = r#"You receive the complete analysis records of a digitized home-video
corpus, one JSON record per tape. Write a synthesis for the editor, in
Markdown:

1. What this corpus is: people, places, span of years.
2. The narrative arcs that run across tapes, with tape names and timecodes.
3. The strongest material: a shortlist of moments an edit should be
   built around.
4. Gaps and absences worth noting.

Cite tape names and timecodes for every claim."#;

/// The instruction payloads, one per remote pass
#[derive(Debug, Clone)]
pub struct PromptSet {
    pub prescan: &'static str,
    pub blind: &'static str,
    pub deep: &'static str,
    pub escalation: &'static str,
    pub synthesis: &'static str,
}

impl Default for PromptSet {
    fn default() -> Self {
        PromptSet {
            prescan: PRESCAN,
            blind: BLIND,
            deep: DEEP,
            escalation: ESCALATION,
            synthesis: SYNTHESIS,
        }
    }
}

impl PromptSet {
    /// Deep-pass instructions, grounded with what the pre-scan learned
    pub fn deep_instructions(&self, profile: Option<&VideoProfile>) -> String {
        let mut text = self.deep.to_string();
        if let Some(profile) = profile {
            let mut context = String::new();
            if let Some(c) = &profile.context {
                context.push_str(&format!("Context from a pre-scan: {}\n", c));
            }
            if !profile.people.is_empty() {
                context.push_str(&format!("People likely present: {}\n", profile.people.join(", ")));
            }
            if let Some(g) = profile.recommended_granularity_secs {
                context.push_str(&format!(
                    "Aim for segments of roughly {} seconds.\n",
                    g
                ));
            }
            if !context.is_empty() {
                text = format!("{}\n\n{}", context.trim_end(), text);
            }
        }
        text
    }

    /// Note prepended to a chunk's instructions so reported timecodes can be
    /// mapped back to the whole tape
    pub fn chunk_note(&self, start_secs: u32, index: usize, total: usize) -> String {
        format!(
            "This is part {} of {} of a longer tape. Report timecodes relative \
             to the start of THIS part; part starts at {} seconds into the tape.",
            index + 1,
            total,
            start_secs
        )
    }
}
