//! Catalog API client.
//!
//! [`CatalogClient`] translates a [`CrawlTarget`] into catalog JSON API calls
//! and returns [`DiscoveredItem`]s with their page image URLs expanded. Every
//! call goes through the task's [`RetryHttpClient`], so the politeness delay,
//! the single request slot and transport retries apply to catalog traffic and
//! image downloads alike.
//!
//! All endpoints answer with the same envelope:
//!
//! ```text
//! { "error": false, "message": "", "body": { ... } }
//! ```

use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use super::error::CatalogError;
use crate::download::RetryHttpClient;
use crate::task::CrawlTarget;

/// Hard stop for tag search pagination, whatever `limit` asks for.
const MAX_SEARCH_PAGES: u32 = 100;

/// One catalog record with its downloadable pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredItem {
    /// Stable catalog identifier.
    pub id: String,
    pub title: String,
    pub tags: Vec<String>,
    /// Original-resolution image URL of each page, in page order.
    pub page_urls: Vec<String>,
}

// ==================== Catalog API Response Types ====================

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    error: bool,
    #[serde(default)]
    message: String,
    body: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchBody {
    illust_manga: SearchResults,
}

#[derive(Debug, Deserialize)]
struct SearchResults {
    #[serde(default)]
    data: Vec<SearchEntry>,
    #[serde(default)]
    total: u64,
}

/// Search entries include ad slots without an id; those are skipped.
#[derive(Debug, Deserialize)]
struct SearchEntry {
    #[serde(default, deserialize_with = "id_string")]
    id: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileBody {
    /// Object keyed by illustration id; an author without works gets `[]`.
    #[serde(default)]
    illusts: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IllustBody {
    #[serde(deserialize_with = "required_id_string")]
    illust_id: String,
    #[serde(default)]
    illust_title: String,
    #[serde(default)]
    tags: IllustTags,
}

#[derive(Debug, Default, Deserialize)]
struct IllustTags {
    #[serde(default)]
    tags: Vec<IllustTag>,
}

#[derive(Debug, Deserialize)]
struct IllustTag {
    tag: String,
}

#[derive(Debug, Deserialize)]
struct PageEntry {
    urls: PageUrls,
}

#[derive(Debug, Deserialize)]
struct PageUrls {
    original: String,
}

/// Catalog ids are numeric strings but some endpoints send them as numbers.
fn id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) if !s.is_empty() => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn required_id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    id_string(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing illustration id"))
}

// ==================== CatalogClient ====================

/// Runs catalog queries for one crawl task.
#[derive(Clone)]
pub struct CatalogClient {
    http: RetryHttpClient,
    base_url: String,
}

impl std::fmt::Debug for CatalogClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl CatalogClient {
    /// Creates a client that sends requests to `base_url` through `http`.
    #[must_use]
    pub fn new(http: RetryHttpClient, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url }
    }

    /// The HTTP client shared with the downloader.
    #[must_use]
    pub fn http(&self) -> &RetryHttpClient {
        &self.http
    }

    /// Base URL requests are sent to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Runs the query `target` describes.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] when the listing call fails. For tag and
    /// author queries a failed per-item lookup only empties that item's pages;
    /// a single-illustration query fails with its lookup.
    pub async fn discover(&self, target: &CrawlTarget) -> Result<Vec<DiscoveredItem>, CatalogError> {
        match target {
            CrawlTarget::Tag {
                query,
                order,
                mode,
                limit,
            } => self.search_by_tag(query, order, mode, *limit).await,
            CrawlTarget::User { user_id, limit } => self.list_user_items(user_id, *limit).await,
            CrawlTarget::Illust { illust_id } => Ok(vec![self.fetch_item(illust_id).await?]),
        }
    }

    /// Searches by tag, following result pages until `limit` items are
    /// collected or a page comes back empty.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] if a search page fails. Page lookups that
    /// fail are logged and leave the item without pages.
    #[instrument(skip(self))]
    pub async fn search_by_tag(
        &self,
        query: &str,
        order: &str,
        mode: &str,
        limit: u32,
    ) -> Result<Vec<DiscoveredItem>, CatalogError> {
        let limit = limit as usize;
        let encoded = urlencoding::encode(query);
        let mut entries: Vec<SearchEntry> = Vec::new();

        for page in 1..=MAX_SEARCH_PAGES {
            let url = format!(
                "{}/ajax/search/artworks/{encoded}?word={encoded}&order={}&mode={}&p={page}&s_mode=s_tag",
                self.base_url,
                urlencoding::encode(order),
                urlencoding::encode(mode),
            );
            let body: SearchBody = self.get_body(&url).await?;
            let results = body.illust_manga;
            let before = entries.len();
            entries.extend(results.data.into_iter().filter(|e| e.id.is_some()));
            debug!(page, added = entries.len() - before, total = results.total, "search page fetched");

            if entries.len() == before
                || entries.len() >= limit
                || (results.total > 0 && entries.len() as u64 >= results.total)
            {
                break;
            }
        }
        entries.truncate(limit);

        let mut items = Vec::with_capacity(entries.len());
        for entry in entries {
            let Some(id) = entry.id else { continue };
            let page_urls = match self.fetch_page_urls(&id).await {
                Ok(urls) => urls,
                Err(e) => {
                    warn!(item_id = %id, error = %e, "page lookup failed; item kept without pages");
                    Vec::new()
                }
            };
            items.push(DiscoveredItem {
                id,
                title: entry.title,
                tags: entry.tags,
                page_urls,
            });
        }
        info!(found = items.len(), "tag search complete");
        Ok(items)
    }

    /// Lists an author's illustrations, newest first, capped at `limit`.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] if the profile lookup fails. Item lookups
    /// that fail are logged and leave the item without pages.
    #[instrument(skip(self))]
    pub async fn list_user_items(
        &self,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<DiscoveredItem>, CatalogError> {
        let url = format!(
            "{}/ajax/user/{}/profile/all",
            self.base_url,
            urlencoding::encode(user_id)
        );
        let profile: ProfileBody = self.get_body(&url).await?;
        let ids = newest_ids(&profile.illusts, limit as usize);
        debug!(count = ids.len(), "author listing fetched");

        let mut items = Vec::with_capacity(ids.len());
        for id in ids {
            match self.fetch_item(&id).await {
                Ok(item) => items.push(item),
                Err(e) => {
                    warn!(item_id = %id, error = %e, "item lookup failed; item kept without pages");
                    items.push(DiscoveredItem {
                        id,
                        title: String::new(),
                        tags: Vec::new(),
                        page_urls: Vec::new(),
                    });
                }
            }
        }
        info!(found = items.len(), "author listing complete");
        Ok(items)
    }

    /// Looks up one illustration with its pages.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] if the detail or page lookup fails.
    #[instrument(skip(self))]
    pub async fn fetch_item(&self, illust_id: &str) -> Result<DiscoveredItem, CatalogError> {
        let url = format!(
            "{}/ajax/illust/{}",
            self.base_url,
            urlencoding::encode(illust_id)
        );
        let body: IllustBody = self.get_body(&url).await?;
        let page_urls = self.fetch_page_urls(&body.illust_id).await?;
        Ok(DiscoveredItem {
            id: body.illust_id,
            title: body.illust_title,
            tags: body.tags.tags.into_iter().map(|t| t.tag).collect(),
            page_urls,
        })
    }

    /// Original-resolution URLs of every page of an illustration.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] if the lookup fails.
    pub async fn fetch_page_urls(&self, illust_id: &str) -> Result<Vec<String>, CatalogError> {
        let url = format!(
            "{}/ajax/illust/{}/pages",
            self.base_url,
            urlencoding::encode(illust_id)
        );
        let pages: Vec<PageEntry> = self.get_body(&url).await?;
        Ok(pages.into_iter().map(|p| p.urls.original).collect())
    }

    async fn get_body<T: DeserializeOwned>(&self, url: &str) -> Result<T, CatalogError> {
        let response = self.http.get_with_retry(url).await?;
        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CatalogError::decode(url, e))?;

        if !status.is_success() {
            // Rejections usually still carry the envelope with a reason.
            if let Ok(envelope) = serde_json::from_slice::<Envelope<serde_json::Value>>(&bytes) {
                if envelope.error {
                    warn!(url, status = status.as_u16(), message = %envelope.message, "catalog rejected request");
                    return Err(CatalogError::api(url, &envelope.message));
                }
            }
            return Err(CatalogError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let envelope: Envelope<T> =
            serde_json::from_slice(&bytes).map_err(|e| CatalogError::decode(url, e))?;
        if envelope.error {
            return Err(CatalogError::api(url, &envelope.message));
        }
        envelope
            .body
            .ok_or_else(|| CatalogError::decode(url, "envelope has no body"))
    }
}

/// Ids from a profile listing, numerically descending, at most `limit`.
fn newest_ids(illusts: &serde_json::Value, limit: usize) -> Vec<String> {
    let serde_json::Value::Object(map) = illusts else {
        return Vec::new();
    };
    let mut ids: Vec<(u64, &String)> = map
        .keys()
        .filter_map(|k| k.parse::<u64>().ok().map(|n| (n, k)))
        .collect();
    ids.sort_unstable_by(|a, b| b.0.cmp(&a.0));
    ids.into_iter()
        .take(limit)
        .map(|(_, k)| k.clone())
        .collect()
}
