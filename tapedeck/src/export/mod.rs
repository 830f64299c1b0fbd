//! Local export of merged records
//!
//! Two render targets per item: an FCPXML document carrying the segments as
//! NLE markers, and a Markdown rushes log for human review. Both are pure
//! functions of the merged record, so export can always be re-run from
//! checkpointed analysis results without touching the remote service.

pub mod fcpxml;
pub mod report;

pub use fcpxml::write_fcpxml;
pub use report::{write_report, write_synthesis};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML write error: {0}")]
    Xml(String),
}
