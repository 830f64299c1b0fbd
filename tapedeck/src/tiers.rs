//! Model tiers and context-budget arithmetic
//!
//! A tier is a named remote-model configuration with per-token pricing and a
//! context window. Video consumes context as a function of duration times the
//! tier's sampling rate, so the budget math here decides both when an item
//! must be chunked and how much footage the escalation pass can afford in a
//! single call.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tokens consumed per second of 1 fps proxy video at low media resolution.
/// Conservative approximation; real consumption varies with content.
pub const TOKENS_PER_PROXY_SECOND: f64 = 92.0;

/// Fraction of the context window usable for media. The remainder is
/// reserved for the instruction payload and the model's reply.
const CONTEXT_HEADROOM: f64 = 0.85;

/// Which tier a request runs under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TierKind {
    /// Cheap, fast pre-scan of a short sample
    Prescan,
    /// Standard analysis tier (blind and framed deep passes)
    Analysis,
    /// Costly escalation tier with the large context window
    Deep,
}

/// A named model tier with cost and context-length limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tier {
    pub kind: TierKind,
    /// Remote model identifier
    pub model: String,
    /// Input cost in USD per million tokens
    pub input_cost_per_mtok: f64,
    /// Output cost in USD per million tokens
    pub output_cost_per_mtok: f64,
    /// Expected output volume as a multiple of input tokens
    pub output_ratio: f64,
    /// Context window in tokens
    pub context_window: u64,
    /// Request reduced media resolution (fits more footage per call)
    pub low_resolution: bool,
}

impl Tier {
    /// Tokens consumed by a stretch of proxy footage
    pub fn tokens_for(&self, footage: Duration) -> u64 {
        (footage.as_secs_f64() * TOKENS_PER_PROXY_SECOND).ceil() as u64
    }

    /// Whether this much footage fits one call's context window
    pub fn fits_single_call(&self, footage: Duration) -> bool {
        self.tokens_for(footage) <= self.media_token_budget()
    }

    /// Longest stretch of footage a single call can carry
    pub fn budget_duration(&self) -> Duration {
        Duration::from_secs_f64(self.media_token_budget() as f64 / TOKENS_PER_PROXY_SECOND)
    }

    /// Estimated USD cost of analyzing this much footage once
    pub fn cost_for(&self, footage: Duration) -> f64 {
        let tokens = self.tokens_for(footage) as f64;
        tokens * (self.input_cost_per_mtok + self.output_cost_per_mtok * self.output_ratio)
            / 1_000_000.0
    }

    fn media_token_budget(&self) -> u64 {
        (self.context_window as f64 * CONTEXT_HEADROOM) as u64
    }
}

/// The three tiers the pipeline uses
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierSet {
    pub prescan: Tier,
    pub analysis: Tier,
    pub deep: Tier,
}

impl TierSet {
    pub fn get(&self, kind: TierKind) -> &Tier {
        match kind {
            TierKind::Prescan => &self.prescan,
            TierKind::Analysis => &self.analysis,
            TierKind::Deep => &self.deep,
        }
    }
}

impl Default for TierSet {
    fn default() -> Self {
        TierSet {
            prescan: Tier {
                kind: TierKind::Prescan,
                model: "gemini-2.5-flash".to_string(),
                input_cost_per_mtok: 0.30,
                output_cost_per_mtok: 2.50,
                output_ratio: 1.0,
                context_window: 1_000_000,
                low_resolution: false,
            },
            analysis: Tier {
                kind: TierKind::Analysis,
                model: "gemini-3-flash-preview".to_string(),
                input_cost_per_mtok: 0.50,
                output_cost_per_mtok: 3.00,
                // Deep-analysis output is verbose relative to input
                output_ratio: 4.0,
                context_window: 1_000_000,
                low_resolution: false,
            },
            deep: Tier {
                kind: TierKind::Deep,
                model: "gemini-2.5-pro".to_string(),
                input_cost_per_mtok: 1.25,
                output_cost_per_mtok: 10.00,
                output_ratio: 1.0,
                context_window: 2_000_000,
                low_resolution: true,
            },
        }
    }
}

/// Pre-run cost estimate across the batch
#[derive(Debug, Clone)]
pub struct CostEstimate {
    pub items: usize,
    pub total_footage: Duration,
    pub analysis_usd: f64,
    pub blind_usd: f64,
    pub deep_usd: f64,
}

impl CostEstimate {
    /// Estimate from probed durations. Escalation is assumed to cover
    /// roughly a tenth of the corpus, matching observed strong-segment rates.
    pub fn compute(durations: &[Duration], tiers: &TierSet, blind_enabled: bool) -> CostEstimate {
        let total: Duration = durations.iter().sum();
        let analysis_usd = tiers.analysis.cost_for(total);
        let blind_usd = if blind_enabled {
            // Blind output is terse: cost it at parity with input
            let tokens = tiers.analysis.tokens_for(total) as f64;
            tokens * (tiers.analysis.input_cost_per_mtok + tiers.analysis.output_cost_per_mtok)
                / 1_000_000.0
        } else {
            0.0
        };
        let deep_usd = tiers.deep.cost_for(total.mul_f64(0.10));
        CostEstimate {
            items: durations.len(),
            total_footage: total,
            analysis_usd,
            blind_usd,
            deep_usd,
        }
    }

    pub fn total_usd(&self) -> f64 {
        self.analysis_usd + self.blind_usd + self.deep_usd
    }
}

impl std::fmt::Display for CostEstimate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let hours = self.total_footage.as_secs_f64() / 3600.0;
        writeln!(f, "  Items          : {}", self.items)?;
        writeln!(f, "  Total footage  : {:.1}h", hours)?;
        writeln!(f, "  Deep analysis  : ~${:.2}", self.analysis_usd)?;
        if self.blind_usd > 0.0 {
            writeln!(f, "  Blind pass     : ~${:.2}", self.blind_usd)?;
        }
        writeln!(f, "  Escalation     : ~${:.2}", self.deep_usd)?;
        write!(f, "  Estimated total: ~${:.2} USD (±40%)", self.total_usd())
    }
}
