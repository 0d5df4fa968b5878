use async_trait::async_trait;
use image::DynamicImage;
use serde::{Deserialize, Deserializer, Serialize};
use thiserror::Error;

/// Decoded raster of a single document page.
pub type Bitmap = DynamicImage;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Malformed search response: {0}")]
    Response(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image cache error: {0}")]
    Cache(#[from] sled::Error),

    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
}

/// A document as returned by a search. Only `id` is required; the rest is
/// whatever metadata the archive exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRef {
    pub id: String,

    #[serde(rename = "documentdate", default)]
    pub date: Option<String>,

    #[serde(rename = "type", default, deserialize_with = "one_or_many")]
    pub types: Vec<String>,

    #[serde(rename = "collection", default, deserialize_with = "one_or_many")]
    pub collections: Vec<String>,

    #[serde(default)]
    pub pages: Option<u32>,
}

impl DocumentRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            date: None,
            types: Vec::new(),
            collections: Vec::new(),
            pages: None,
        }
    }
}

/// Archive metadata is inconsistent about single values versus lists.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
        Missing(()),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(value) => vec![value],
        OneOrMany::Many(values) => values,
        OneOrMany::Missing(()) => Vec::new(),
    })
}

/// Conjunction of optional filters. An absent filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchFilters {
    pub collection: Option<String>,
    pub doc_type: Option<String>,
    pub max_pages: Option<u32>,
}

impl SearchFilters {
    pub fn with_collection(mut self, collection: Option<String>) -> Self {
        self.collection = collection;
        self
    }

    pub fn with_doc_type(mut self, doc_type: Option<String>) -> Self {
        self.doc_type = doc_type;
        self
    }

    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Client-side evaluation, for sources that cannot filter themselves.
    /// A document without a page count never passes a page limit.
    pub fn matches(&self, doc: &DocumentRef) -> bool {
        if let Some(collection) = &self.collection {
            if !doc.collections.iter().any(|c| c == collection) {
                return false;
            }
        }
        if let Some(doc_type) = &self.doc_type {
            if !doc.types.iter().any(|t| t == doc_type) {
                return false;
            }
        }
        if let Some(max_pages) = self.max_pages {
            match doc.pages {
                Some(pages) if pages <= max_pages => {}
                _ => return false,
            }
        }
        true
    }

    pub fn label(&self) -> String {
        format!(
            "collection={} type={}",
            self.collection.as_deref().unwrap_or("*"),
            self.doc_type.as_deref().unwrap_or("*")
        )
    }
}

/// Result of retrieving one document image. Missing and undecodable
/// documents are expected and are not errors.
#[derive(Debug)]
pub enum FetchOutcome {
    Found(Bitmap),
    NotFound,
    DecodeError(String),
}

impl FetchOutcome {
    pub fn decode(bytes: &[u8]) -> Self {
        let reader = match image::ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format()
        {
            Ok(reader) => reader,
            Err(e) => return FetchOutcome::DecodeError(e.to_string()),
        };

        match reader.decode() {
            Ok(bitmap) => FetchOutcome::Found(bitmap),
            Err(e) => FetchOutcome::DecodeError(e.to_string()),
        }
    }
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// One page of documents matching `filters`, starting at `offset`.
    async fn search(
        &self,
        filters: &SearchFilters,
        offset: u64,
        page_size: u32,
    ) -> Result<Vec<DocumentRef>, SourceError>;

    /// Number of documents matching `filters`.
    async fn count(&self, filters: &SearchFilters) -> Result<u64, SourceError>;

    /// First page of the document's scan.
    async fn fetch_image(&self, doc_id: &str) -> Result<FetchOutcome, SourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, Luma};
    use std::io::Cursor;

    fn doc(collection: &str, doc_type: &str, pages: Option<u32>) -> DocumentRef {
        DocumentRef {
            id: "abcd0001".to_string(),
            date: None,
            types: vec![doc_type.to_string()],
            collections: vec![collection.to_string()],
            pages,
        }
    }

    #[test]
    fn test_deserialize_search_document() {
        let json = r#"{
            "id": "ffbb0123",
            "documentdate": "1987-04-01",
            "type": ["letter", "memo"],
            "collection": "tobacco",
            "pages": 2,
            "ignored": true
        }"#;

        let parsed: DocumentRef = serde_json::from_str(json).unwrap();

        assert_eq!(parsed.id, "ffbb0123");
        assert_eq!(parsed.date.as_deref(), Some("1987-04-01"));
        assert_eq!(parsed.types, vec!["letter", "memo"]);
        assert_eq!(parsed.collections, vec!["tobacco"]);
        assert_eq!(parsed.pages, Some(2));
    }

    #[test]
    fn test_deserialize_minimal_document() {
        let parsed: DocumentRef = serde_json::from_str(r#"{"id": "x"}"#).unwrap();

        assert_eq!(parsed, DocumentRef::new("x"));
    }

    #[test]
    fn test_empty_filters_match_everything() {
        assert!(SearchFilters::default().matches(&DocumentRef::new("x")));
    }

    #[test]
    fn test_filters_are_a_conjunction() {
        let filters = SearchFilters::default()
            .with_collection(Some("pharma".to_string()))
            .with_doc_type(Some("report".to_string()))
            .with_max_pages(Some(1));

        assert!(filters.matches(&doc("pharma", "report", Some(1))));
        assert!(!filters.matches(&doc("food", "report", Some(1))));
        assert!(!filters.matches(&doc("pharma", "letter", Some(1))));
        assert!(!filters.matches(&doc("pharma", "report", Some(3))));
        assert!(!filters.matches(&doc("pharma", "report", None)));
    }

    #[test]
    fn test_decode_png_bytes() {
        let img = ImageBuffer::from_fn(8, 8, |x, _| Luma([(x * 30) as u8]));
        let mut bytes = Vec::new();
        img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        match FetchOutcome::decode(&bytes) {
            FetchOutcome::Found(bitmap) => assert_eq!(bitmap.width(), 8),
            other => panic!("expected a bitmap, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_garbage_is_decode_error() {
        let outcome = FetchOutcome::decode(b"definitely not an image");

        assert!(matches!(outcome, FetchOutcome::DecodeError(_)));
    }
}
