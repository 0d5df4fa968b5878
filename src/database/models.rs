use crate::schema::*;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

// Candidate models
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = candidates)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Candidate {
    pub id: i32,
    pub doc1_id: String,
    pub doc2_id: String,
    pub similarity_score: f64,
    pub model: String,
    pub created_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = candidates)]
pub struct NewCandidate {
    pub doc1_id: String,
    pub doc2_id: String,
    pub similarity_score: f64,
    pub model: String,
    pub created_at: String,
}

// Comparison models (human feedback)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, Selectable)]
#[diesel(table_name = comparisons)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Comparison {
    pub id: i32,
    pub doc1_id: String,
    pub doc2_id: String,
    pub user_feedback: Option<i32>,
    pub comments: Option<String>,
    pub comparison_date: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = comparisons)]
pub struct NewComparison {
    pub doc1_id: String,
    pub doc2_id: String,
    pub user_feedback: Option<i32>,
    pub comments: Option<String>,
    pub comparison_date: String,
}

/// Result of an idempotent insert. A duplicate key is an expected outcome,
/// not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Six-level scale reviewers use to grade a pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FeedbackLevel {
    TotallyDifferent,
    SlightlyRelated,
    ModerateSimilarities,
    ConsiderableSimilarity,
    SameLayout,
    SameDocument,
}

impl FeedbackLevel {
    pub const ALL: [FeedbackLevel; 6] = [
        FeedbackLevel::TotallyDifferent,
        FeedbackLevel::SlightlyRelated,
        FeedbackLevel::ModerateSimilarities,
        FeedbackLevel::ConsiderableSimilarity,
        FeedbackLevel::SameLayout,
        FeedbackLevel::SameDocument,
    ];

    pub fn value(self) -> i32 {
        self as i32
    }

    pub fn label(self) -> &'static str {
        match self {
            FeedbackLevel::TotallyDifferent => "Totally different",
            FeedbackLevel::SlightlyRelated => "Slightly related",
            FeedbackLevel::ModerateSimilarities => "Moderate similarities",
            FeedbackLevel::ConsiderableSimilarity => "Considerable similarity",
            FeedbackLevel::SameLayout => "Exactly the same layout",
            FeedbackLevel::SameDocument => "Exactly the same document",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            FeedbackLevel::TotallyDifferent => {
                "Completely different layout with no elements in common (e.g. a receipt and a book page). The content is unrelated."
            }
            FeedbackLevel::SlightlyRelated => {
                "Similar purpose, but incompatible layouts with little structural overlap (e.g. a form and a spreadsheet)."
            }
            FeedbackLevel::ModerateSimilarities => {
                "Some visual or structural similarities such as text boxes or headers, but a weak relation in layout and content."
            }
            FeedbackLevel::ConsiderableSimilarity => {
                "Close layout structures (similarly organised tables, forms with equivalent fields). Content differences dominate."
            }
            FeedbackLevel::SameLayout => {
                "Identical layouts with completely different content (e.g. the same form filled in differently)."
            }
            FeedbackLevel::SameDocument => {
                "Identical layout and content with no perceptible change. Includes copies and reprints of one document."
            }
        }
    }
}

impl TryFrom<i32> for FeedbackLevel {
    type Error = i32;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|index| FeedbackLevel::ALL.get(index).copied())
            .ok_or(value)
    }
}

impl From<FeedbackLevel> for i32 {
    fn from(level: FeedbackLevel) -> Self {
        level.value()
    }
}

impl Comparison {
    pub fn feedback_level(&self) -> Option<FeedbackLevel> {
        self.user_feedback
            .and_then(|value| FeedbackLevel::try_from(value).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feedback_level_round_trips_through_i32() {
        for (index, level) in FeedbackLevel::ALL.iter().enumerate() {
            assert_eq!(level.value(), index as i32);
            assert_eq!(FeedbackLevel::try_from(index as i32), Ok(*level));
        }
    }

    #[test]
    fn test_feedback_level_rejects_out_of_range() {
        assert_eq!(FeedbackLevel::try_from(6), Err(6));
        assert_eq!(FeedbackLevel::try_from(-1), Err(-1));
    }
}
