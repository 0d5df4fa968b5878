//! Client for the Industry Documents Library: a Solr metadata index plus a
//! static file server holding one TIFF per document.

use crate::pipeline::document::{DocumentRef, DocumentSource, FetchOutcome, SearchFilters, SourceError};
use crate::services::cache::ImageCache;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

pub const DEFAULT_SEARCH_URL: &str = "https://metadata.idl.ucsf.edu/solr/ltdl3/query";
pub const DEFAULT_DOWNLOAD_URL: &str = "https://download.industrydocuments.ucsf.edu";
const VIEW_URL: &str = "https://www.industrydocuments.ucsf.edu/docs/#id=";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    response: SearchBody,
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    #[serde(rename = "numFound", default)]
    num_found: u64,
    #[serde(default)]
    docs: Vec<DocumentRef>,
}

pub struct IndustryDocsSource {
    client: Client,
    search_url: String,
    download_url: String,
    cache: Option<ImageCache>,
}

impl IndustryDocsSource {
    pub fn new(
        search_url: impl Into<String>,
        download_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, SourceError> {
        let client = Client::builder()
            .user_agent(concat!("docpair/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            search_url: search_url.into(),
            download_url: download_url.into().trim_end_matches('/').to_string(),
            cache: None,
        })
    }

    pub fn with_cache(mut self, cache: ImageCache) -> Self {
        self.cache = Some(cache);
        self
    }

    async fn query(
        &self,
        filters: &SearchFilters,
        offset: u64,
        rows: u32,
    ) -> Result<SearchBody, SourceError> {
        let query = build_query(filters);
        let rows = rows.to_string();
        let start = offset.to_string();
        log::debug!("Searching {} with q={} start={} rows={}", self.search_url, query, start, rows);

        let response = self
            .client
            .get(&self.search_url)
            .query(&[
                ("q", query.as_str()),
                ("wt", "json"),
                ("rows", rows.as_str()),
                ("start", start.as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url: self.search_url.clone(),
            });
        }

        let body = response.bytes().await?;
        parse_search_response(&body)
    }

    fn cached(&self, doc_id: &str) -> Option<FetchOutcome> {
        let cache = self.cache.as_ref()?;
        let bytes = match cache.get(doc_id) {
            Ok(bytes) => bytes?,
            Err(e) => {
                log::warn!("Image cache read failed for {}: {}", doc_id, e);
                return None;
            }
        };

        match FetchOutcome::decode(&bytes) {
            found @ FetchOutcome::Found(_) => Some(found),
            _ => {
                log::warn!("Dropping undecodable cache entry for {}", doc_id);
                if let Err(e) = cache.remove(doc_id) {
                    log::warn!("Failed to evict cache entry for {}: {}", doc_id, e);
                }
                None
            }
        }
    }
}

#[async_trait]
impl DocumentSource for IndustryDocsSource {
    async fn search(
        &self,
        filters: &SearchFilters,
        offset: u64,
        page_size: u32,
    ) -> Result<Vec<DocumentRef>, SourceError> {
        Ok(self.query(filters, offset, page_size).await?.docs)
    }

    async fn count(&self, filters: &SearchFilters) -> Result<u64, SourceError> {
        Ok(self.query(filters, 0, 0).await?.num_found)
    }

    async fn fetch_image(&self, doc_id: &str) -> Result<FetchOutcome, SourceError> {
        if let Some(outcome) = self.cached(doc_id) {
            return Ok(outcome);
        }

        let url = match tif_url(&self.download_url, doc_id) {
            Some(url) => url,
            None => {
                log::debug!("Document id {:?} is too short to locate a scan", doc_id);
                return Ok(FetchOutcome::NotFound);
            }
        };

        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(FetchOutcome::NotFound);
        }
        if !status.is_success() {
            return Err(SourceError::Status {
                status: status.as_u16(),
                url,
            });
        }

        let bytes = response.bytes().await?;
        let outcome = FetchOutcome::decode(&bytes);

        if let (FetchOutcome::Found(_), Some(cache)) = (&outcome, &self.cache) {
            if let Err(e) = cache.insert(doc_id, &bytes) {
                log::warn!("Failed to cache image for {}: {}", doc_id, e);
            }
        }

        Ok(outcome)
    }
}

/// Solr query for `filters`; `*:*` when no filter is set.
pub fn build_query(filters: &SearchFilters) -> String {
    let mut parts = Vec::new();
    if let Some(collection) = &filters.collection {
        parts.push(format!("collection:\"{}\"", escape(collection)));
    }
    if let Some(doc_type) = &filters.doc_type {
        parts.push(format!("type:\"{}\"", escape(doc_type)));
    }
    if let Some(max_pages) = filters.max_pages {
        parts.push(format!("pages:[* TO {}]", max_pages));
    }

    if parts.is_empty() {
        "*:*".to_string()
    } else {
        parts.join(" AND ")
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Scans are sharded by the first four characters of the id:
/// `{base}/{c0}/{c1}/{c2}/{c3}/{id}/{id}.tif`.
pub fn tif_url(download_url: &str, doc_id: &str) -> Option<String> {
    let shard: Vec<char> = doc_id.chars().take(4).collect();
    if shard.len() < 4 {
        return None;
    }
    Some(format!(
        "{}/{}/{}/{}/{}/{}/{}.tif",
        download_url.trim_end_matches('/'),
        shard[0],
        shard[1],
        shard[2],
        shard[3],
        doc_id,
        doc_id
    ))
}

/// Public page for a document, for reviewers.
pub fn view_url(doc_id: &str) -> String {
    format!("{}{}", VIEW_URL, doc_id)
}

fn parse_search_response(body: &[u8]) -> Result<SearchBody, SourceError> {
    let parsed: SearchResponse = serde_json::from_slice(body)?;
    Ok(parsed.response)
}
