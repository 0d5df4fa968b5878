use super::{DatabaseError, Repository};
use crate::database::models::{Candidate, InsertOutcome, NewCandidate};
use crate::database::DbPool;
use crate::pipeline::store::CandidateStore;
use crate::schema::{candidates, comparisons};
use chrono::Utc;
use diesel::prelude::*;

#[derive(Clone)]
pub struct CandidateRepository {
    pool: DbPool,
}

impl Repository for CandidateRepository {
    fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl CandidateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts a candidate unless `(doc1_id, doc2_id, model)` is already
    /// stored. The first score recorded for a triple is kept.
    pub fn insert(
        &self,
        doc1_id: &str,
        doc2_id: &str,
        similarity_score: f64,
        model: &str,
    ) -> Result<InsertOutcome, DatabaseError> {
        if !similarity_score.is_finite() {
            return Err(DatabaseError::InvalidValue {
                field: "similarity_score",
                reason: format!("{} is not a finite number", similarity_score),
            });
        }

        let new_candidate = NewCandidate {
            doc1_id: doc1_id.to_string(),
            doc2_id: doc2_id.to_string(),
            similarity_score,
            model: model.to_string(),
            created_at: Utc::now().to_rfc3339(),
        };

        let mut conn = self.get_connection()?;
        let inserted = diesel::insert_into(candidates::table)
            .values(&new_candidate)
            .on_conflict((candidates::doc1_id, candidates::doc2_id, candidates::model))
            .do_nothing()
            .execute(&mut conn)?;

        if inserted > 0 {
            Ok(InsertOutcome::Inserted)
        } else {
            log::debug!(
                "Candidate ({}, {}, {}) already stored",
                doc1_id,
                doc2_id,
                model
            );
            Ok(InsertOutcome::AlreadyExists)
        }
    }

    pub fn count(&self) -> Result<i64, DatabaseError> {
        let mut conn = self.get_connection()?;

        candidates::table
            .count()
            .get_result(&mut conn)
            .map_err(DatabaseError::Query)
    }

    /// Returns up to `limit` candidates in insertion order.
    pub fn fetch(&self, limit: i64) -> Result<Vec<Candidate>, DatabaseError> {
        let mut conn = self.get_connection()?;

        candidates::table
            .order(candidates::id.asc())
            .limit(limit.max(0))
            .select(Candidate::as_select())
            .load(&mut conn)
            .map_err(DatabaseError::Query)
    }

    pub fn exists(&self, doc1_id: &str, doc2_id: &str, model: &str) -> Result<bool, DatabaseError> {
        let mut conn = self.get_connection()?;

        let count: i64 = candidates::table
            .filter(candidates::doc1_id.eq(doc1_id))
            .filter(candidates::doc2_id.eq(doc2_id))
            .filter(candidates::model.eq(model))
            .count()
            .get_result(&mut conn)?;

        Ok(count > 0)
    }

    /// Candidates whose pair has no reviewer feedback yet, oldest first.
    pub fn find_unreviewed(&self, limit: i64) -> Result<Vec<Candidate>, DatabaseError> {
        let mut conn = self.get_connection()?;

        candidates::table
            .left_join(
                comparisons::table.on(comparisons::doc1_id
                    .eq(candidates::doc1_id)
                    .and(comparisons::doc2_id.eq(candidates::doc2_id))),
            )
            .filter(comparisons::id.is_null())
            .order(candidates::id.asc())
            .limit(limit.max(0))
            .select(Candidate::as_select())
            .load(&mut conn)
            .map_err(DatabaseError::Query)
    }
}

impl CandidateStore for CandidateRepository {
    fn insert_candidate(
        &self,
        doc1_id: &str,
        doc2_id: &str,
        score: f64,
        model: &str,
    ) -> Result<InsertOutcome, DatabaseError> {
        self.insert(doc1_id, doc2_id, score, model)
    }

    fn count_candidates(&self) -> Result<i64, DatabaseError> {
        self.count()
    }

    fn fetch_candidates(&self, limit: i64) -> Result<Vec<Candidate>, DatabaseError> {
        self.fetch(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::models::FeedbackLevel;
    use crate::database::repositories::ComparisonRepository;
    use crate::database::test_support::test_pool;

    #[test]
    fn test_insert_and_count() {
        let (_dir, pool) = test_pool();
        let repo = CandidateRepository::new(pool);

        assert_eq!(repo.count().unwrap(), 0);
        let outcome = repo.insert("abcd0001", "abcd0002", 0.95, "ssim").unwrap();

        assert_eq!(outcome, InsertOutcome::Inserted);
        assert_eq!(repo.count().unwrap(), 1);
        assert!(repo.exists("abcd0001", "abcd0002", "ssim").unwrap());
    }

    #[test]
    fn test_duplicate_insert_keeps_first_score() {
        let (_dir, pool) = test_pool();
        let repo = CandidateRepository::new(pool);

        repo.insert("abcd0001", "abcd0002", 0.91, "ssim").unwrap();
        let outcome = repo.insert("abcd0001", "abcd0002", 0.99, "ssim").unwrap();

        assert_eq!(outcome, InsertOutcome::AlreadyExists);
        let stored = repo.fetch(10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].similarity_score, 0.91);
    }

    #[test]
    fn test_same_pair_different_model_is_distinct() {
        let (_dir, pool) = test_pool();
        let repo = CandidateRepository::new(pool);

        repo.insert("abcd0001", "abcd0002", 0.91, "ssim").unwrap();
        let outcome = repo.insert("abcd0001", "abcd0002", 1.0, "phash").unwrap();

        assert_eq!(outcome, InsertOutcome::Inserted);
        assert_eq!(repo.count().unwrap(), 2);
    }

    #[test]
    fn test_reversed_pair_is_a_different_key() {
        let (_dir, pool) = test_pool();
        let repo = CandidateRepository::new(pool);

        repo.insert("abcd0001", "abcd0002", 0.91, "ssim").unwrap();
        let outcome = repo.insert("abcd0002", "abcd0001", 0.91, "ssim").unwrap();

        assert_eq!(outcome, InsertOutcome::Inserted);
    }

    #[test]
    fn test_fetch_is_insertion_ordered_and_bounded() {
        let (_dir, pool) = test_pool();
        let repo = CandidateRepository::new(pool);

        for i in 0..5 {
            repo.insert(&format!("doc{}", 9 - i), "zzzz0000", 0.9, "ssim")
                .unwrap();
        }

        let fetched = repo.fetch(3).unwrap();
        let ids: Vec<&str> = fetched.iter().map(|c| c.doc1_id.as_str()).collect();
        assert_eq!(ids, vec!["doc9", "doc8", "doc7"]);

        assert!(repo.fetch(0).unwrap().is_empty());
        assert!(repo.fetch(-4).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_finite_score() {
        let (_dir, pool) = test_pool();
        let repo = CandidateRepository::new(pool);

        let result = repo.insert("abcd0001", "abcd0002", f64::NAN, "ssim");

        assert!(matches!(result, Err(DatabaseError::InvalidValue { .. })));
        assert_eq!(repo.count().unwrap(), 0);
    }

    #[test]
    fn test_find_unreviewed_skips_reviewed_pairs() {
        let (_dir, pool) = test_pool();
        let candidates = CandidateRepository::new(pool.clone());
        let comparisons = ComparisonRepository::new(pool);

        candidates.insert("aaaa0001", "aaaa0002", 0.93, "ssim").unwrap();
        candidates.insert("aaaa0003", "aaaa0004", 0.97, "ssim").unwrap();
        comparisons
            .save_or_update(
                "aaaa0001",
                "aaaa0002",
                Some(FeedbackLevel::SameLayout),
                None,
            )
            .unwrap();

        let unreviewed = candidates.find_unreviewed(10).unwrap();
        assert_eq!(unreviewed.len(), 1);
        assert_eq!(unreviewed[0].doc1_id, "aaaa0003");
    }

    #[test]
    fn test_store_trait_delegates() {
        let (_dir, pool) = test_pool();
        let repo = CandidateRepository::new(pool);
        let store: &dyn CandidateStore = &repo;

        store.insert_candidate("x1x1", "y2y2", 0.9, "stub-always").unwrap();

        assert_eq!(store.count_candidates().unwrap(), 1);
        assert_eq!(store.fetch_candidates(5).unwrap()[0].model, "stub-always");
    }
}
