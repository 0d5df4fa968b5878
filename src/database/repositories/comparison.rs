use super::{DatabaseError, Repository};
use crate::database::models::{Comparison, FeedbackLevel, NewComparison};
use crate::database::DbPool;
use crate::schema::comparisons;
use chrono::Utc;
use diesel::prelude::*;

/// Reviewer feedback on document pairs. One row per `(doc1_id, doc2_id)`.
#[derive(Clone)]
pub struct ComparisonRepository {
    pool: DbPool,
}

impl Repository for ComparisonRepository {
    fn pool(&self) -> &DbPool {
        &self.pool
    }
}

impl ComparisonRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Inserts the feedback, or overwrites feedback, comments and date of the
    /// existing row for the same pair.
    pub fn save_or_update(
        &self,
        doc1_id: &str,
        doc2_id: &str,
        feedback: Option<FeedbackLevel>,
        comments: Option<String>,
    ) -> Result<Comparison, DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let user_feedback = feedback.map(i32::from);

        let new_comparison = NewComparison {
            doc1_id: doc1_id.to_string(),
            doc2_id: doc2_id.to_string(),
            user_feedback,
            comments: comments.clone(),
            comparison_date: now.clone(),
        };

        let mut conn = self.get_connection()?;
        diesel::insert_into(comparisons::table)
            .values(&new_comparison)
            .on_conflict((comparisons::doc1_id, comparisons::doc2_id))
            .do_update()
            .set((
                comparisons::user_feedback.eq(user_feedback),
                comparisons::comments.eq(comments),
                comparisons::comparison_date.eq(now),
            ))
            .execute(&mut conn)?;

        self.find(doc1_id, doc2_id)?
            .ok_or(DatabaseError::Query(diesel::result::Error::NotFound))
    }

    /// Same as [`save_or_update`](Self::save_or_update) for a raw score from
    /// an untyped caller; values outside 0..=5 are rejected before the store
    /// is touched.
    pub fn save_raw(
        &self,
        doc1_id: &str,
        doc2_id: &str,
        feedback: i32,
        comments: Option<String>,
    ) -> Result<Comparison, DatabaseError> {
        let level = FeedbackLevel::try_from(feedback).map_err(|value| {
            DatabaseError::InvalidValue {
                field: "user_feedback",
                reason: format!("{} is outside 0..=5", value),
            }
        })?;
        self.save_or_update(doc1_id, doc2_id, Some(level), comments)
    }

    pub fn find(&self, doc1_id: &str, doc2_id: &str) -> Result<Option<Comparison>, DatabaseError> {
        let mut conn = self.get_connection()?;

        comparisons::table
            .filter(comparisons::doc1_id.eq(doc1_id))
            .filter(comparisons::doc2_id.eq(doc2_id))
            .select(Comparison::as_select())
            .first(&mut conn)
            .optional()
            .map_err(DatabaseError::Query)
    }

    pub fn exists(&self, doc1_id: &str, doc2_id: &str) -> Result<bool, DatabaseError> {
        Ok(self.find(doc1_id, doc2_id)?.is_some())
    }

    pub fn list(&self) -> Result<Vec<Comparison>, DatabaseError> {
        let mut conn = self.get_connection()?;

        comparisons::table
            .order(comparisons::id.asc())
            .select(Comparison::as_select())
            .load(&mut conn)
            .map_err(DatabaseError::Query)
    }

    pub fn count(&self) -> Result<i64, DatabaseError> {
        let mut conn = self.get_connection()?;

        comparisons::table
            .count()
            .get_result(&mut conn)
            .map_err(DatabaseError::Query)
    }
}
