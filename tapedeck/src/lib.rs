//! tapedeck - AI analysis pipeline for digitized archive footage
//!
//! Drives a batch of long-form source videos through a multi-phase analysis
//! pipeline: local proxy transcode, a cheap remote pre-scan, an optional
//! unframed ("blind") pass, the framed deep analysis, selective escalation of
//! strong segments to a costlier model tier, and local export of editor-facing
//! artifacts (FCPXML markers + rushes logs).
//!
//! The orchestration core owns the real invariants: exactly-once progress per
//! (item, phase), durable checkpointing for resume and retry, a global
//! concurrency ceiling on remote calls, and a deterministic merge of the
//! independent analysis passes.

pub mod catalog;
pub mod client;
pub mod export;
pub mod layout;
pub mod merge;
pub mod models;
pub mod orchestrator;
pub mod prompts;
pub mod select;
pub mod service;
pub mod store;
pub mod tiers;
pub mod transcode;
