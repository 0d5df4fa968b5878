pub mod cache;
pub mod directory;
pub mod industry_docs;

pub use cache::ImageCache;
pub use directory::DirectorySource;
pub use industry_docs::IndustryDocsSource;
