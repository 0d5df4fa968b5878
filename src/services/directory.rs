use crate::pipeline::document::{DocumentRef, DocumentSource, FetchOutcome, SearchFilters, SourceError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const SUPPORTED_EXTENSIONS: &[&str] = &["tif", "tiff", "png", "jpg", "jpeg", "bmp", "gif"];

/// Offline archive laid out as `<root>/<collection>/<type>/<id>.<ext>`.
///
/// The tree is indexed once on construction. Files closer to the root simply
/// lack the collection or type metadata. Every file counts as a single page.
pub struct DirectorySource {
    root: PathBuf,
    documents: Vec<DocumentRef>,
    paths: HashMap<String, PathBuf>,
}

impl DirectorySource {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SourceError> {
        let root = root.as_ref().to_path_buf();
        if !root.is_dir() {
            return Err(SourceError::InvalidPath {
                path: root.display().to_string(),
            });
        }

        let mut files: Vec<PathBuf> = WalkDir::new(&root)
            .follow_links(false)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| is_supported_format(p))
            .collect();
        files.sort();

        let mut documents = Vec::new();
        let mut paths = HashMap::new();
        for path in files {
            let Some(id) = path.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            if paths.contains_key(&id) {
                log::warn!("Ignoring {}: document id {} already indexed", path.display(), id);
                continue;
            }

            let folders: Vec<String> = path
                .strip_prefix(&root)
                .ok()
                .and_then(Path::parent)
                .map(|parent| {
                    parent
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().to_string())
                        .collect()
                })
                .unwrap_or_default();

            let mut doc = DocumentRef::new(id.clone());
            doc.collections = folders.first().cloned().into_iter().collect();
            doc.types = folders.get(1).cloned().into_iter().collect();
            doc.pages = Some(1);

            documents.push(doc);
            paths.insert(id, path);
        }
        documents.sort_by(|a, b| a.id.cmp(&b.id));

        log::info!("Indexed {} documents under {}", documents.len(), root.display());
        Ok(Self {
            root,
            documents,
            paths,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn matching<'a>(&'a self, filters: &'a SearchFilters) -> impl Iterator<Item = &'a DocumentRef> {
        self.documents.iter().filter(move |d| filters.matches(d))
    }
}

pub fn is_supported_format(path: &Path) -> bool {
    if let Some(extension) = path.extension() {
        let ext = extension.to_string_lossy().to_lowercase();
        SUPPORTED_EXTENSIONS.contains(&ext.as_str())
    } else {
        false
    }
}

#[async_trait]
impl DocumentSource for DirectorySource {
    async fn search(
        &self,
        filters: &SearchFilters,
        offset: u64,
        page_size: u32,
    ) -> Result<Vec<DocumentRef>, SourceError> {
        Ok(self
            .matching(filters)
            .skip(offset as usize)
            .take(page_size as usize)
            .cloned()
            .collect())
    }

    async fn count(&self, filters: &SearchFilters) -> Result<u64, SourceError> {
        Ok(self.matching(filters).count() as u64)
    }

    async fn fetch_image(&self, doc_id: &str) -> Result<FetchOutcome, SourceError> {
        let Some(path) = self.paths.get(doc_id) else {
            return Ok(FetchOutcome::NotFound);
        };

        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(FetchOutcome::decode(&bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(FetchOutcome::NotFound),
            Err(e) => Err(SourceError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::fs;
    use tempfile::TempDir;

    fn write_page(dir: &Path, name: &str) {
        fs::create_dir_all(dir).unwrap();
        let img = ImageBuffer::from_fn(12, 12, |x, y| Rgb([(x * 20) as u8, (y * 20) as u8, 128]));
        img.save(dir.join(name)).unwrap();
    }

    fn archive() -> TempDir {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        write_page(&root.join("tobacco").join("letter"), "bbbb0002.png");
        write_page(&root.join("tobacco").join("letter"), "aaaa0001.png");
        write_page(&root.join("tobacco").join("memo"), "cccc0003.jpg");
        write_page(&root.join("pharma").join("report"), "dddd0004.tif");
        fs::write(root.join("tobacco").join("notes.txt"), "not a scan").unwrap();
        temp_dir
    }

    #[test]
    fn test_invalid_root() {
        let result = DirectorySource::new("/nonexistent/archive");

        assert!(matches!(result, Err(SourceError::InvalidPath { .. })));
    }

    #[test]
    fn test_supported_formats() {
        assert!(is_supported_format(Path::new("scan.TIF")));
        assert!(is_supported_format(Path::new("scan.jpeg")));
        assert!(!is_supported_format(Path::new("notes.txt")));
        assert!(!is_supported_format(Path::new("scan")));
    }

    #[tokio::test]
    async fn test_index_is_sorted_with_folder_metadata() {
        let dir = archive();
        let source = DirectorySource::new(dir.path()).unwrap();

        let docs = source.search(&SearchFilters::default(), 0, 10).await.unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();

        assert_eq!(ids, vec!["aaaa0001", "bbbb0002", "cccc0003", "dddd0004"]);
        assert_eq!(docs[2].collections, vec!["tobacco"]);
        assert_eq!(docs[2].types, vec!["memo"]);
        assert_eq!(docs[3].pages, Some(1));
    }

    #[tokio::test]
    async fn test_filters_and_paging() {
        let dir = archive();
        let source = DirectorySource::new(dir.path()).unwrap();
        let tobacco = SearchFilters::default()
            .with_collection(Some("tobacco".to_string()))
            .with_max_pages(Some(1));

        assert_eq!(source.count(&tobacco).await.unwrap(), 3);
        let second_page = source.search(&tobacco, 2, 2).await.unwrap();
        assert_eq!(second_page.len(), 1);
        assert_eq!(second_page[0].id, "cccc0003");

        let letters = tobacco.with_doc_type(Some("letter".to_string()));
        assert_eq!(source.count(&letters).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_fetch_image() {
        let dir = archive();
        let source = DirectorySource::new(dir.path()).unwrap();

        match source.fetch_image("dddd0004").await.unwrap() {
            FetchOutcome::Found(bitmap) => assert_eq!((bitmap.width(), bitmap.height()), (12, 12)),
            other => panic!("expected a bitmap, got {:?}", other),
        }
        assert!(matches!(
            source.fetch_image("zzzz9999").await.unwrap(),
            FetchOutcome::NotFound
        ));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_decode_error() {
        let dir = archive();
        fs::write(dir.path().join("eeee0005.png"), b"not really a png").unwrap();
        let source = DirectorySource::new(dir.path()).unwrap();

        assert!(matches!(
            source.fetch_image("eeee0005").await.unwrap(),
            FetchOutcome::DecodeError(_)
        ));
    }

    #[tokio::test]
    async fn test_deleted_file_is_not_found() {
        let dir = archive();
        let source = DirectorySource::new(dir.path()).unwrap();
        fs::remove_file(dir.path().join("tobacco").join("letter").join("aaaa0001.png")).unwrap();

        assert!(matches!(
            source.fetch_image("aaaa0001").await.unwrap(),
            FetchOutcome::NotFound
        ));
    }
}
