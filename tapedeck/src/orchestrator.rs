//! Run orchestration: eligibility, dispatch, and per-item phase execution
//!
//! The orchestrator owns the run loop. Items progress concurrently; phases
//! within an item are strictly sequential in dependency order. Which phases
//! dispatch is decided by pure eligibility functions over the checkpoint
//! store's state, so resume, single-phase, and retry-failed are all the same
//! loop with a different filter. A phase failure is recorded and starves its
//! downstream phases through the prerequisite check; it never aborts the
//! run. Only checkpoint-store failures do.

use crate::client::RateLimitedClient;
use crate::export::{self, ExportError};
use crate::layout::WorkLayout;
use crate::merge;
use crate::models::{AnalysisPass, ItemId, MergedRecord, Phase, PhaseStatus, WorkItem};
use crate::prompts::PromptSet;
use crate::select::select_for_escalation;
use crate::service::{self, AnalysisService, ServiceError};
use crate::store::{CheckpointStore, StoreError};
use crate::tiers::TierSet;
use crate::transcode::{ProxyManifest, TranscodeError, Transcoder};
use futures::stream::{self, TryStreamExt};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a run dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Default: dispatch every pending or failed phase whose prerequisites
    /// hold. Succeeded work is never repeated.
    Resume,
    /// Report what would dispatch, call nothing, write nothing
    DryRun,
    /// Dispatch only the named phase, where its prerequisites already hold
    SinglePhase(Phase),
    /// Dispatch exactly the currently-failed records; pending work that
    /// never failed is not advanced
    RetryFailed,
}

/// Run configuration, resolved from CLI flags and config file
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mode: RunMode,
    /// Run the unframed second pass
    pub blind_enabled: bool,
    /// Transcode proxies; off means the source files are uploaded as-is
    pub proxy_enabled: bool,
    pub escalation_enabled: bool,
    pub synthesis_enabled: bool,
    /// Items progressing concurrently
    pub concurrency: usize,
    pub requests_per_minute: u32,
    /// A `running` record older than this belongs to a dead process
    pub stale_after: chrono::Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            mode: RunMode::Resume,
            blind_enabled: false,
            proxy_enabled: true,
            escalation_enabled: true,
            synthesis_enabled: true,
            concurrency: 3,
            requests_per_minute: 9,
            stale_after: chrono::Duration::minutes(15),
        }
    }
}

/// Whether run options allow a phase at all, before looking at state
pub fn phase_enabled(phase: Phase, options: &RunOptions) -> bool {
    match phase {
        Phase::Blind => options.blind_enabled,
        Phase::Escalate => options.escalation_enabled,
        Phase::Synthesis => options.synthesis_enabled,
        _ => true,
    }
}

/// Pure eligibility check for one phase of one item.
///
/// Eligible means: enabled by options, currently pending or failed, every
/// prerequisite succeeded, and allowed by the mode filter. A failed phase
/// is reset before dispatch so every retry goes through the store's single
/// retry primitive. Running and succeeded phases are never eligible.
pub fn eligible(
    phase: Phase,
    statuses: &HashMap<Phase, PhaseStatus>,
    options: &RunOptions,
) -> bool {
    if !phase_enabled(phase, options) {
        return false;
    }
    if let RunMode::SinglePhase(only) = options.mode {
        if phase != only {
            return false;
        }
    }
    let status = statuses.get(&phase).copied().unwrap_or(PhaseStatus::Pending);
    if !matches!(status, PhaseStatus::Pending | PhaseStatus::Failed) {
        return false;
    }
    phase
        .prerequisites()
        .iter()
        .all(|p| statuses.get(p) == Some(&PhaseStatus::Succeeded))
}

/// Phases that would dispatch for one item, assuming each one succeeds.
/// Used by dry-run reporting.
pub fn plan_item(
    statuses: &HashMap<Phase, PhaseStatus>,
    options: &RunOptions,
) -> Vec<Phase> {
    let mut simulated = statuses.clone();
    let mut planned = Vec::new();
    for phase in Phase::PER_ITEM {
        if eligible(phase, &simulated, options) {
            planned.push(phase);
            simulated.insert(phase, PhaseStatus::Succeeded);
        }
    }
    planned
}

/// Failure of one phase execution; recorded, never propagated
#[derive(Debug, Error)]
enum PhaseError {
    #[error(transparent)]
    Transcode(#[from] TranscodeError),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact error: {0}")]
    Artifact(String),
}

/// End-of-run accounting
#[derive(Debug, Default)]
pub struct RunSummary {
    /// Dry-run only: what would have dispatched
    pub planned: Vec<(ItemId, Phase)>,
    pub dispatched: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Failed records left in the store after the run
    pub failures_remaining: usize,
}

#[derive(Default)]
struct Counters {
    dispatched: AtomicUsize,
    succeeded: AtomicUsize,
    failed: AtomicUsize,
}

/// The run loop and its collaborators
pub struct Orchestrator<S: AnalysisService, T: Transcoder> {
    store: CheckpointStore,
    client: RateLimitedClient<S>,
    transcoder: T,
    layout: WorkLayout,
    prompts: PromptSet,
    tiers: TierSet,
    options: RunOptions,
    cancel: CancellationToken,
}

impl<S: AnalysisService, T: Transcoder> Orchestrator<S, T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: CheckpointStore,
        client: RateLimitedClient<S>,
        transcoder: T,
        layout: WorkLayout,
        prompts: PromptSet,
        tiers: TierSet,
        options: RunOptions,
        cancel: CancellationToken,
    ) -> Self {
        Orchestrator {
            store,
            client,
            transcoder,
            layout,
            prompts,
            tiers,
            options,
            cancel,
        }
    }

    pub async fn run(&self, items: &[WorkItem]) -> Result<RunSummary, StoreError> {
        self.store
            .recover_stale_running(self.options.stale_after)
            .await?;

        let retry_set = match self.options.mode {
            RunMode::RetryFailed => {
                let failed = self.store.failed_records().await?;
                if failed.is_empty() {
                    info!("No failed records to retry");
                }
                for (item, phase) in &failed {
                    self.store.reset(item, *phase).await?;
                }
                Some(failed.into_iter().collect::<HashSet<_>>())
            }
            _ => None,
        };

        if self.options.mode == RunMode::DryRun {
            return self.dry_run(items).await;
        }

        let counters = Counters::default();
        stream::iter(items.iter().map(Ok::<_, StoreError>))
            .try_for_each_concurrent(Some(self.options.concurrency.max(1)), |item| {
                self.process_item(item, retry_set.as_ref(), &counters)
            })
            .await?;

        if !self.cancel.is_cancelled() {
            self.maybe_synthesize(items, retry_set.as_ref(), &counters)
                .await?;
        }

        let summary = RunSummary {
            planned: Vec::new(),
            dispatched: counters.dispatched.load(Ordering::SeqCst),
            succeeded: counters.succeeded.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            failures_remaining: self.store.failure_count().await?,
        };
        info!(
            dispatched = summary.dispatched,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "Run complete"
        );
        Ok(summary)
    }

    async fn dry_run(&self, items: &[WorkItem]) -> Result<RunSummary, StoreError> {
        let mut planned = Vec::new();
        for item in items {
            let statuses = self.store.statuses(&item.id).await?;
            for phase in plan_item(&statuses, &self.options) {
                planned.push((item.id.clone(), phase));
            }
        }
        if self.synthesis_would_run(items).await? {
            planned.push((ItemId::corpus(), Phase::Synthesis));
        }
        let failures_remaining = self.store.failure_count().await?;
        Ok(RunSummary {
            planned,
            failures_remaining,
            ..Default::default()
        })
    }

    async fn synthesis_would_run(&self, items: &[WorkItem]) -> Result<bool, StoreError> {
        if !phase_enabled(Phase::Synthesis, &self.options) {
            return Ok(false);
        }
        match self.options.mode {
            RunMode::SinglePhase(p) if p != Phase::Synthesis => return Ok(false),
            _ => {}
        }
        let corpus = ItemId::corpus();
        let status = self.store.status(&corpus, Phase::Synthesis).await?;
        if !matches!(status, PhaseStatus::Pending | PhaseStatus::Failed) {
            return Ok(false);
        }
        // Corpus gate: at least one item must have a deep result, either
        // already checkpointed or about to be produced this run
        for item in items {
            let statuses = self.store.statuses(&item.id).await?;
            if statuses.get(&Phase::Deep) == Some(&PhaseStatus::Succeeded)
                || plan_item(&statuses, &self.options).contains(&Phase::Deep)
            {
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn process_item(
        &self,
        item: &WorkItem,
        retry_set: Option<&HashSet<(ItemId, Phase)>>,
        counters: &Counters,
    ) -> Result<(), StoreError> {
        for phase in Phase::PER_ITEM {
            if self.cancel.is_cancelled() {
                info!(item = %item.id, "Cancelled, leaving remaining phases pending");
                return Ok(());
            }
            if let Some(set) = retry_set {
                if !set.contains(&(item.id.clone(), phase)) {
                    continue;
                }
            }
            let statuses = self.store.statuses(&item.id).await?;
            if !eligible(phase, &statuses, &self.options) {
                debug!(item = %item.id, %phase, "Not eligible, skipping");
                continue;
            }
            if statuses.get(&phase) == Some(&PhaseStatus::Failed) {
                self.store.reset(&item.id, phase).await?;
            }

            counters.dispatched.fetch_add(1, Ordering::SeqCst);
            self.store.record_start(&item.id, phase).await?;
            info!(item = %item.id, %phase, "Phase started");

            match self.execute_phase(item, phase).await {
                Ok(result_ref) => {
                    self.store
                        .record_success(&item.id, phase, result_ref.as_deref())
                        .await?;
                    counters.succeeded.fetch_add(1, Ordering::SeqCst);
                    info!(item = %item.id, %phase, "Phase succeeded");
                }
                Err(e) => {
                    self.store
                        .record_failure(&item.id, phase, &e.to_string())
                        .await?;
                    counters.failed.fetch_add(1, Ordering::SeqCst);
                    warn!(item = %item.id, %phase, error = %e, "Phase failed");
                }
            }
        }
        Ok(())
    }

    async fn execute_phase(
        &self,
        item: &WorkItem,
        phase: Phase,
    ) -> Result<Option<String>, PhaseError> {
        match phase {
            Phase::Proxy => self.run_proxy(item).await,
            Phase::Prescan => self.run_prescan(item).await,
            Phase::Blind => self.run_blind(item).await,
            Phase::Deep => self.run_deep(item).await,
            Phase::Escalate => self.run_escalate(item).await,
            Phase::Export => self.run_export(item).await,
            Phase::Synthesis => self.run_synthesis(item).await,
        }
    }

    async fn run_proxy(&self, item: &WorkItem) -> Result<Option<String>, PhaseError> {
        self.transcoder
            .prepare(item, &self.layout, self.options.proxy_enabled)
            .await?;
        let path = self.layout.manifest_path(&item.stem());
        Ok(Some(path.display().to_string()))
    }

    async fn run_prescan(&self, item: &WorkItem) -> Result<Option<String>, PhaseError> {
        let manifest = self.load_manifest(item)?;
        let reply = self
            .client
            .invoke(&manifest.sample, &self.tiers.prescan, self.prompts.prescan)
            .await?;
        let pass = service::parse_pass(&reply)?;
        let path = self.layout.prescan_path(&item.stem());
        write_json(&path, &pass)?;
        Ok(Some(path.display().to_string()))
    }

    async fn run_blind(&self, item: &WorkItem) -> Result<Option<String>, PhaseError> {
        let manifest = self.load_manifest(item)?;
        let pass = self
            .run_chunked_pass(&manifest, self.prompts.blind.to_string())
            .await?;
        let path = self.layout.blind_path(&item.stem());
        write_json(&path, &pass)?;
        Ok(Some(path.display().to_string()))
    }

    async fn run_deep(&self, item: &WorkItem) -> Result<Option<String>, PhaseError> {
        let manifest = self.load_manifest(item)?;
        let prescan: Option<AnalysisPass> =
            read_json_opt(&self.layout.prescan_path(&item.stem()))?;
        let profile = prescan.and_then(|p| p.profile);
        let instructions = self.prompts.deep_instructions(profile.as_ref());

        let mut framed = self.run_chunked_pass(&manifest, instructions).await?;
        if framed.profile.is_none() {
            framed.profile = profile;
        }

        let blind: Option<AnalysisPass> = read_json_opt(&self.layout.blind_path(&item.stem()))?;
        let record = merge::merge_passes(
            &item.id,
            item.path.display().to_string(),
            framed,
            blind,
            Some(self.tiers.analysis.model.clone()),
        );
        let path = self.layout.record_path(&item.stem());
        write_json(&path, &record)?;
        Ok(Some(path.display().to_string()))
    }

    async fn run_escalate(&self, item: &WorkItem) -> Result<Option<String>, PhaseError> {
        let record_path = self.layout.record_path(&item.stem());
        let mut record: MergedRecord = read_json(&record_path)?;

        let budget = self.tiers.deep.budget_duration();
        let selected = select_for_escalation(&record.segments, budget);
        if selected.is_empty() {
            // Nothing strong enough; the phase still succeeds
            info!(item = %item.id, "No segments selected for escalation");
            return Ok(None);
        }

        let manifest = self.load_manifest(item)?;
        let mut instructions = self.prompts.escalation.to_string();
        instructions.push_str("\n\nSpans to re-examine:\n");
        for &index in &selected {
            let seg = &record.segments[index];
            instructions.push_str(&format!("- {} to {}: {}\n", seg.start, seg.end, seg.description));
        }

        let reply = self
            .client
            .invoke(&manifest.analysis_media, &self.tiers.deep, &instructions)
            .await?;
        let pass = service::parse_pass(&reply)?;

        let mut attached = 0;
        for reply_seg in &pass.segments {
            if reply_seg.note.is_empty() {
                continue;
            }
            if let Some(target) = record
                .segments
                .iter_mut()
                .find(|s| s.overlaps(reply_seg) && s.escalation_note.is_none())
            {
                target.escalation_note = Some(reply_seg.note.clone());
                attached += 1;
            }
        }
        debug!(item = %item.id, selected = selected.len(), attached, "Escalation notes attached");

        write_json(&record_path, &record)?;
        Ok(Some(record_path.display().to_string()))
    }

    async fn run_export(&self, item: &WorkItem) -> Result<Option<String>, PhaseError> {
        let record: MergedRecord = read_json(&self.layout.record_path(&item.stem()))?;
        let fcpxml = self.layout.fcpxml_path(&item.stem());
        export::write_fcpxml(&record, &fcpxml)?;
        export::write_report(&record, &self.layout.report_path(&item.stem()))?;
        Ok(Some(fcpxml.display().to_string()))
    }

    async fn run_synthesis(&self, _item: &WorkItem) -> Result<Option<String>, PhaseError> {
        Err(PhaseError::Artifact(
            "synthesis runs at corpus level, not per item".to_string(),
        ))
    }

    /// One analysis pass over every chunk of an item, stitched back together
    async fn run_chunked_pass(
        &self,
        manifest: &ProxyManifest,
        instructions: String,
    ) -> Result<AnalysisPass, PhaseError> {
        let total = manifest.chunks.len();
        let mut chunk_passes = Vec::with_capacity(total);
        for (index, chunk) in manifest.chunks.iter().enumerate() {
            let text = if total > 1 {
                format!(
                    "{}\n\n{}",
                    self.prompts
                        .chunk_note(chunk.start_secs as u32, index, total),
                    instructions
                )
            } else {
                instructions.clone()
            };
            let reply = self
                .client
                .invoke(&chunk.path, &self.tiers.analysis, &text)
                .await?;
            let pass = service::parse_pass(&reply)?;
            chunk_passes.push((chunk.start_secs as u32, pass));
        }
        Ok(merge::merge_chunks(chunk_passes))
    }

    /// Corpus synthesis, checkpointed under the reserved corpus item
    async fn maybe_synthesize(
        &self,
        items: &[WorkItem],
        retry_set: Option<&HashSet<(ItemId, Phase)>>,
        counters: &Counters,
    ) -> Result<(), StoreError> {
        let corpus = ItemId::corpus();
        if let Some(set) = retry_set {
            if !set.contains(&(corpus.clone(), Phase::Synthesis)) {
                return Ok(());
            }
        } else {
            if !phase_enabled(Phase::Synthesis, &self.options) {
                return Ok(());
            }
            if let RunMode::SinglePhase(p) = self.options.mode {
                if p != Phase::Synthesis {
                    return Ok(());
                }
            }
            let status = self.store.status(&corpus, Phase::Synthesis).await?;
            if !matches!(status, PhaseStatus::Pending | PhaseStatus::Failed) {
                return Ok(());
            }
            if status == PhaseStatus::Failed {
                self.store.reset(&corpus, Phase::Synthesis).await?;
            }
        }

        // Gather the records of every item whose deep phase succeeded
        let mut records = Vec::new();
        for item in items {
            if self.store.status(&item.id, Phase::Deep).await? == PhaseStatus::Succeeded {
                let path = self.layout.record_path(&item.stem());
                match std::fs::read_to_string(&path) {
                    Ok(json) => records.push(json),
                    Err(e) => {
                        warn!(item = %item.id, error = %e, "Record missing, excluded from synthesis")
                    }
                }
            }
        }
        if records.is_empty() {
            debug!("No analyzed items, skipping synthesis");
            return Ok(());
        }

        counters.dispatched.fetch_add(1, Ordering::SeqCst);
        self.store.record_start(&corpus, Phase::Synthesis).await?;
        info!(records = records.len(), "Corpus synthesis started");

        let context = records.join("\n\n");
        let outcome = async {
            let reply = self
                .client
                .invoke_text(&self.tiers.deep, self.prompts.synthesis, &context)
                .await?;
            let path = self.layout.synthesis_path();
            export::write_synthesis(&reply, &path)?;
            Ok::<String, PhaseError>(path.display().to_string())
        }
        .await;

        match outcome {
            Ok(path) => {
                self.store
                    .record_success(&corpus, Phase::Synthesis, Some(&path))
                    .await?;
                counters.succeeded.fetch_add(1, Ordering::SeqCst);
                info!("Corpus synthesis succeeded");
            }
            Err(e) => {
                self.store
                    .record_failure(&corpus, Phase::Synthesis, &e.to_string())
                    .await?;
                counters.failed.fetch_add(1, Ordering::SeqCst);
                error!(error = %e, "Corpus synthesis failed");
            }
        }
        Ok(())
    }

    fn load_manifest(&self, item: &WorkItem) -> Result<ProxyManifest, PhaseError> {
        let path = self.layout.manifest_path(&item.stem());
        ProxyManifest::load(&path).map_err(|e| {
            PhaseError::Artifact(format!("manifest unreadable at {}: {}", path.display(), e))
        })
    }
}

fn write_json<V: serde::Serialize>(path: &Path, value: &V) -> Result<(), PhaseError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(value)
        .map_err(|e| PhaseError::Artifact(e.to_string()))?;
    std::fs::write(path, json)?;
    Ok(())
}

fn read_json<V: serde::de::DeserializeOwned>(path: &Path) -> Result<V, PhaseError> {
    let data = std::fs::read_to_string(path)?;
    serde_json::from_str(&data)
        .map_err(|e| PhaseError::Artifact(format!("{}: {}", path.display(), e)))
}

fn read_json_opt<V: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<V>, PhaseError> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use crate::models::CategoryTag;
    use crate::service::UploadHandle;
    use crate::tiers::Tier;
    use crate::transcode::MediaChunk;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    /// Parses as a valid reply for prescan, blind, deep, and escalation
    const UNIVERSAL_REPLY: &str = r#"{
        "profile": {"context": "Birthday in the kitchen", "people": ["Anna"]},
        "segments": [
            {"start": "00:00:10", "end": "00:00:40",
             "description": "Candles lit", "note": "hesitation",
             "category": "intimate", "interest": "strong"},
            {"start": "00:01:00", "end": "00:01:20",
             "description": "Pan across the table", "category": "transition"}
        ],
        "observations": {"biographical_value": "High"}
    }"#;

    struct FakeService {
        media_calls: AtomicUsize,
        text_calls: AtomicUsize,
    }

    impl FakeService {
        fn new() -> Self {
            FakeService {
                media_calls: AtomicUsize::new(0),
                text_calls: AtomicUsize::new(0),
            }
        }
    }

    impl AnalysisService for FakeService {
        async fn upload(&self, _media: &Path) -> Result<UploadHandle, ServiceError> {
            Ok(UploadHandle {
                name: "files/fake".to_string(),
                uri: "https://fake/files/fake".to_string(),
            })
        }

        async fn generate(
            &self,
            _upload: &UploadHandle,
            _tier: &Tier,
            _instructions: &str,
        ) -> Result<String, ServiceError> {
            self.media_calls.fetch_add(1, Ordering::SeqCst);
            Ok(UNIVERSAL_REPLY.to_string())
        }

        async fn generate_text(
            &self,
            _tier: &Tier,
            _instructions: &str,
            _context: &str,
        ) -> Result<String, ServiceError> {
            self.text_calls.fetch_add(1, Ordering::SeqCst);
            Ok("# Corpus synthesis\n\nOne tape, one kitchen.".to_string())
        }

        async fn delete_upload(&self, _upload: UploadHandle) -> Result<(), ServiceError> {
            Ok(())
        }
    }

    /// Writes a single-chunk manifest without touching ffmpeg
    struct FakeTranscoder;

    impl Transcoder for FakeTranscoder {
        async fn probe_duration(
            &self,
            _media: &Path,
        ) -> Result<std::time::Duration, TranscodeError> {
            Ok(std::time::Duration::from_secs(90))
        }

        async fn prepare(
            &self,
            item: &WorkItem,
            layout: &WorkLayout,
            _make_proxy: bool,
        ) -> Result<ProxyManifest, TranscodeError> {
            let manifest = ProxyManifest {
                source: item.path.clone(),
                analysis_media: item.path.clone(),
                duration_secs: 90,
                chunks: vec![MediaChunk {
                    path: item.path.clone(),
                    start_secs: 0,
                    end_secs: 90,
                }],
                sample: item.path.clone(),
            };
            manifest.save(&layout.manifest_path(&item.stem()))?;
            Ok(manifest)
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        items: Vec<WorkItem>,
        layout: WorkLayout,
        store: CheckpointStore,
    }

    async fn fixture(names: &[&str]) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let items: Vec<WorkItem> = names
            .iter()
            .map(|n| {
                let path = dir.path().join(n);
                std::fs::write(&path, b"video bytes").unwrap();
                WorkItem::new(path)
            })
            .collect();
        let layout = WorkLayout::for_source(dir.path());
        layout.ensure_work_dir().unwrap();
        let store = CheckpointStore::in_memory().await.unwrap();
        Fixture {
            _dir: dir,
            items,
            layout,
            store,
        }
    }

    fn orchestrator(
        fix: &Fixture,
        options: RunOptions,
    ) -> Orchestrator<FakeService, FakeTranscoder> {
        let client = RateLimitedClient::new(
            FakeService::new(),
            600,
            4,
            RetryPolicy {
                max_attempts: 1,
                base_backoff: std::time::Duration::from_millis(1),
                multiplier: 1,
            },
        );
        Orchestrator::new(
            fix.store.clone(),
            client,
            FakeTranscoder,
            fix.layout.clone(),
            PromptSet::default(),
            TierSet::default(),
            options,
            CancellationToken::new(),
        )
    }

    fn full_options() -> RunOptions {
        RunOptions {
            blind_enabled: true,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_full_run_completes_every_phase() {
        let fix = fixture(&["tape_01.mp4"]).await;
        let orch = orchestrator(&fix, full_options());

        let summary = orch.run(&fix.items).await.unwrap();
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.failures_remaining, 0);
        // proxy, prescan, blind, deep, escalate, export, synthesis
        assert_eq!(summary.dispatched, 7);

        let id = &fix.items[0].id;
        for phase in Phase::PER_ITEM {
            assert_eq!(
                fix.store.status(id, phase).await.unwrap(),
                PhaseStatus::Succeeded,
                "phase {} not succeeded",
                phase
            );
        }
        assert_eq!(
            fix.store
                .status(&ItemId::corpus(), Phase::Synthesis)
                .await
                .unwrap(),
            PhaseStatus::Succeeded
        );

        assert!(fix.layout.record_path("tape_01").exists());
        assert!(fix.layout.fcpxml_path("tape_01").exists());
        assert!(fix.layout.report_path("tape_01").exists());
        assert!(fix.layout.synthesis_path().exists());

        // prescan + blind + deep + escalation media calls, one text call
        let service = orch.client.service();
        assert_eq!(service.media_calls.load(Ordering::SeqCst), 4);
        assert_eq!(service.text_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resume_of_complete_run_dispatches_nothing() {
        let fix = fixture(&["tape_01.mp4"]).await;
        orchestrator(&fix, full_options())
            .run(&fix.items)
            .await
            .unwrap();

        let orch = orchestrator(&fix, full_options());
        let summary = orch.run(&fix.items).await.unwrap();
        assert_eq!(summary.dispatched, 0);
        assert_eq!(orch.client.service().media_calls.load(Ordering::SeqCst), 0);
        assert_eq!(orch.client.service().text_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_failed_dispatches_exactly_the_failed_set() {
        let fix = fixture(&["tape_01.mp4"]).await;
        orchestrator(&fix, full_options())
            .run(&fix.items)
            .await
            .unwrap();

        // Force one phase into failure, then retry
        let id = &fix.items[0].id;
        fix.store
            .record_failure(id, Phase::Deep, "simulated")
            .await
            .unwrap();

        let options = RunOptions {
            mode: RunMode::RetryFailed,
            ..full_options()
        };
        let orch = orchestrator(&fix, options);
        let summary = orch.run(&fix.items).await.unwrap();

        assert_eq!(summary.dispatched, 1);
        assert_eq!(summary.succeeded, 1);
        assert_eq!(orch.client.service().media_calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            fix.store.status(id, Phase::Deep).await.unwrap(),
            PhaseStatus::Succeeded
        );
    }

    #[tokio::test]
    async fn test_failed_phase_starves_downstream_but_stays_retryable() {
        let fix = fixture(&["tape_01.mp4"]).await;
        let id = fix.items[0].id.clone();

        // Proxy succeeded, prescan failed on a previous run
        fix.store.record_start(&id, Phase::Proxy).await.unwrap();
        fix.store
            .record_success(&id, Phase::Proxy, None)
            .await
            .unwrap();
        fix.store.record_start(&id, Phase::Prescan).await.unwrap();
        fix.store
            .record_failure(&id, Phase::Prescan, "quota")
            .await
            .unwrap();

        let statuses = fix.store.statuses(&id).await.unwrap();
        let options = full_options();
        // The failed phase itself is re-dispatched on resume
        assert!(eligible(Phase::Prescan, &statuses, &options));
        // Its dependents stay starved until it actually succeeds
        assert!(!eligible(Phase::Deep, &statuses, &options));
        // Blind only needs the proxy
        assert!(eligible(Phase::Blind, &statuses, &options));
    }

    #[tokio::test]
    async fn test_resume_dispatches_failed_phase_and_dependents_only() {
        let fix = fixture(&["tape_01.mp4"]).await;
        let id = fix.items[0].id.clone();

        // Earlier run: proxy succeeded, prescan failed, nothing downstream ran
        FakeTranscoder
            .prepare(&fix.items[0], &fix.layout, true)
            .await
            .unwrap();
        fix.store.record_start(&id, Phase::Proxy).await.unwrap();
        fix.store
            .record_success(&id, Phase::Proxy, None)
            .await
            .unwrap();
        fix.store.record_start(&id, Phase::Prescan).await.unwrap();
        fix.store
            .record_failure(&id, Phase::Prescan, "quota")
            .await
            .unwrap();

        let options = RunOptions {
            synthesis_enabled: false,
            ..Default::default()
        };
        let orch = orchestrator(&fix, options);
        let summary = orch.run(&fix.items).await.unwrap();

        // Prescan retried, then deep, escalate, export; proxy untouched
        assert_eq!(summary.dispatched, 4);
        assert_eq!(summary.failed, 0);
        assert_eq!(
            fix.store.status(&id, Phase::Prescan).await.unwrap(),
            PhaseStatus::Succeeded
        );
        // prescan + deep + escalation uploads, no proxy re-run
        assert_eq!(orch.client.service().media_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_dry_run_calls_nothing_and_writes_nothing() {
        let fix = fixture(&["tape_01.mp4", "tape_02.mp4"]).await;
        let options = RunOptions {
            mode: RunMode::DryRun,
            ..full_options()
        };
        let orch = orchestrator(&fix, options);
        let summary = orch.run(&fix.items).await.unwrap();

        // 6 per-item phases times 2 items, plus synthesis
        assert_eq!(summary.planned.len(), 13);
        assert_eq!(summary.dispatched, 0);
        assert_eq!(orch.client.service().media_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            fix.store
                .status(&fix.items[0].id, Phase::Proxy)
                .await
                .unwrap(),
            PhaseStatus::Pending
        );
    }

    #[tokio::test]
    async fn test_single_phase_requires_met_prerequisites() {
        let fix = fixture(&["tape_01.mp4"]).await;
        let options = RunOptions {
            mode: RunMode::SinglePhase(Phase::Deep),
            ..full_options()
        };
        let orch = orchestrator(&fix, options);

        // Nothing has run, so deep's prerequisites are unmet
        let summary = orch.run(&fix.items).await.unwrap();
        assert_eq!(summary.dispatched, 0);
    }

    #[test]
    fn test_plan_simulates_cascade() {
        let options = full_options();
        let planned = plan_item(&HashMap::new(), &options);
        assert_eq!(
            planned,
            vec![
                Phase::Proxy,
                Phase::Prescan,
                Phase::Blind,
                Phase::Deep,
                Phase::Escalate,
                Phase::Export
            ]
        );

        // Disabled blind drops out of the plan without blocking deep
        let no_blind = RunOptions::default();
        let planned = plan_item(&HashMap::new(), &no_blind);
        assert!(!planned.contains(&Phase::Blind));
        assert!(planned.contains(&Phase::Deep));
    }

    #[test]
    fn test_eligibility_by_status() {
        let options = full_options();
        let mut statuses = HashMap::new();
        statuses.insert(Phase::Proxy, PhaseStatus::Succeeded);
        statuses.insert(Phase::Prescan, PhaseStatus::Running);
        assert!(!eligible(Phase::Prescan, &statuses, &options));
        statuses.insert(Phase::Prescan, PhaseStatus::Succeeded);
        assert!(!eligible(Phase::Prescan, &statuses, &options));
        statuses.insert(Phase::Prescan, PhaseStatus::Failed);
        assert!(eligible(Phase::Prescan, &statuses, &options));
        statuses.insert(Phase::Prescan, PhaseStatus::Pending);
        assert!(eligible(Phase::Prescan, &statuses, &options));
    }

    #[tokio::test]
    async fn test_deep_record_carries_blind_notes() {
        let fix = fixture(&["tape_01.mp4"]).await;
        let orch = orchestrator(&fix, full_options());
        orch.run(&fix.items).await.unwrap();

        let record: MergedRecord = read_json(&fix.layout.record_path("tape_01")).unwrap();
        assert!(!record.segments.is_empty());
        // The blind pass reported the same spans, so overlaps carry notes
        assert!(record.segments.iter().any(|s| s.blind_note.is_some()));
        assert!(record
            .segments
            .iter()
            .any(|s| s.category == CategoryTag::Intimate));
        // Escalation attached a close reading to the strong segment
        assert!(record.segments.iter().any(|s| s.escalation_note.is_some()));
    }

    #[tokio::test]
    async fn test_no_proxy_mode_analyzes_source_directly() {
        let fix = fixture(&["tape_01.mp4"]).await;
        let options = RunOptions {
            proxy_enabled: false,
            synthesis_enabled: false,
            blind_enabled: false,
            ..Default::default()
        };
        let orch = orchestrator(&fix, options);
        let summary = orch.run(&fix.items).await.unwrap();
        assert_eq!(summary.failed, 0);

        let manifest = ProxyManifest::load(&fix.layout.manifest_path("tape_01")).unwrap();
        assert_eq!(manifest.analysis_media, PathBuf::from(&fix.items[0].path));
    }
}
