pub mod canonical;
pub mod deletion;
pub mod duplicates;
pub mod fields;
pub mod links;
pub mod orchestrator;
pub mod progress;
pub mod savings;
pub mod structured;

pub use canonical::CanonicalIndex;
pub use deletion::{DeletionFailure, DeletionReport, SafeDeletionGate};
pub use duplicates::DuplicateMap;
pub use fields::{TextFieldUpdater, TextRewriteSummary};
pub use links::{LinkMatch, LinkMatcher, RewriteOutcome, TextReferenceRewriter};
pub use orchestrator::{ConsolidationReport, Consolidator, MappingSummary, StructuredSummary};
pub use progress::{ProgressEvent, ProgressSink, RecordingProgress, TracingProgress};
pub use savings::{SavingsReport, WastedSpace};
pub use structured::{StructuredReferenceUpdater, StructuredUpdate};
