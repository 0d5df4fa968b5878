use crate::database::models::{Candidate, InsertOutcome};
use crate::database::DatabaseError;

/// What the batch driver needs from candidate persistence.
///
/// `insert_candidate` must be idempotent on `(doc1_id, doc2_id, model)`: a
/// repeated key returns [`InsertOutcome::AlreadyExists`] and leaves the stored
/// record untouched. Concurrent runs rely on this instead of any locking of
/// their own.
pub trait CandidateStore: Send + Sync {
    fn insert_candidate(
        &self,
        doc1_id: &str,
        doc2_id: &str,
        score: f64,
        model: &str,
    ) -> Result<InsertOutcome, DatabaseError>;

    fn count_candidates(&self) -> Result<i64, DatabaseError>;

    fn fetch_candidates(&self, limit: i64) -> Result<Vec<Candidate>, DatabaseError>;
}
