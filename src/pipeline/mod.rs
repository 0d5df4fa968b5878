pub mod batch;
pub mod document;
pub mod pairing;
pub mod similarity;
pub mod store;

pub use batch::{
    BatchContext, BatchDriver, BatchProgress, BatchSummary, CancellationToken,
    GroupOutcome, GroupReport, GroupedReport,
};
pub use document::{Bitmap, DocumentRef, DocumentSource, FetchOutcome, SearchFilters, SourceError};
pub use similarity::{EngineError, EngineRegistry, ScoreResult, SimilarityEngine};
pub use store::CandidateStore;
