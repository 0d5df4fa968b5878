pub mod candidate;
pub mod comparison;

pub use candidate::CandidateRepository;
pub use comparison::ComparisonRepository;

use super::{DatabaseError, DbConnection, DbPool};

pub trait Repository {
    fn pool(&self) -> &DbPool;

    fn get_connection(&self) -> Result<DbConnection, DatabaseError> {
        Ok(self.pool().get()?)
    }
}
