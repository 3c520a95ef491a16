//! Crawl routine: catalog query, item persistence, page downloads.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::trace;

use super::worker::{Halt, Step, WorkerContext, scaled_progress};
use crate::download::{
    ClientConfig, DownloadProgress, ProgressCallback, ProgressDownloader, RetryHttpClient,
    item_page_filename,
};
use crate::events::LogLevel;
use crate::source::{CatalogClient, DiscoveredItem};
use crate::task::{CrawlConfig, NewCrawledItem};

const PROGRESS_ADAPTER_READY: i64 = 10;
const PROGRESS_QUERY_DONE: i64 = 30;
const PROGRESS_ITEMS_PERSISTED: i64 = 40;
const PROGRESS_DOWNLOADS_DONE: i64 = 95;

/// HTTP client configuration for one crawl.
pub(crate) fn client_config(ctx: &WorkerContext, config: &CrawlConfig) -> ClientConfig {
    let settings = &ctx.settings;
    ClientConfig {
        cookie: config
            .cookie
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string),
        proxy: config.effective_proxy().map(str::to_string),
        request_delay: config
            .delay
            .map_or(settings.default_request_delay, Duration::from_millis),
        connect_timeout: settings.connect_timeout,
        request_timeout: settings.request_timeout,
        retry_policy: settings.retry_policy(),
        proxy_probe_url: settings.proxy_probe_url.clone(),
        ..ClientConfig::default()
    }
}

pub(crate) async fn run(ctx: &WorkerContext, config: &CrawlConfig) -> Step<()> {
    ctx.check_cancelled()?;

    let target = config.target().map_err(Halt::Failed)?;
    let http = RetryHttpClient::new(client_config(ctx, config))
        .map_err(|e| Halt::Failed(e.to_string()))?;
    if let Some(proxy) = config.effective_proxy() {
        match http.test_proxy_connection().await {
            Ok(()) => ctx.log(LogLevel::Info, format!("proxy {proxy} reachable")),
            Err(e) => ctx.log(LogLevel::Warn, format!("proxy check failed: {e}")),
        }
    }
    let catalog = CatalogClient::new(http.clone(), ctx.settings.catalog_base_url.clone());
    let downloader = ProgressDownloader::new(http, ctx.settings.download_root.clone())
        .with_max_file_size(ctx.settings.max_file_size);
    ctx.progress(PROGRESS_ADAPTER_READY).await?;

    ctx.check_cancelled()?;
    ctx.log(LogLevel::Info, format!("querying catalog: {target:?}"));
    let items = match catalog.discover(&target).await {
        Ok(items) => items,
        Err(e) => {
            ctx.log(LogLevel::Error, format!("catalog query failed: {e}"));
            return Err(Halt::Failed(e.to_string()));
        }
    };
    ctx.progress(PROGRESS_QUERY_DONE).await?;

    ctx.set_found(items.len()).await?;
    ctx.log(LogLevel::Info, format!("found {} items", items.len()));
    persist_items(ctx, &items).await;
    ctx.progress(PROGRESS_ITEMS_PERSISTED).await?;

    let mut downloaded = 0usize;
    for (index, item) in items.iter().enumerate() {
        ctx.check_cancelled()?;
        if download_item(ctx, &downloader, item).await? {
            downloaded += 1;
            ctx.set_downloaded(downloaded).await?;
        }
        ctx.progress(scaled_progress(
            PROGRESS_ITEMS_PERSISTED,
            PROGRESS_DOWNLOADS_DONE,
            index + 1,
            items.len(),
        ))
        .await?;
    }

    ctx.set_downloaded(downloaded).await?;
    ctx.set_result(&json!({
        "images_found": items.len(),
        "images_downloaded": downloaded,
        "output_dir": downloader.task_dir(&ctx.task_id).display().to_string(),
    }))
    .await?;
    ctx.log(
        LogLevel::Info,
        format!("crawl finished: {downloaded}/{} items downloaded", items.len()),
    );
    ctx.progress(100).await
}

/// Records discovered items; a failed insert is logged and skipped.
async fn persist_items(ctx: &WorkerContext, items: &[DiscoveredItem]) {
    let repo = ctx.updater.repository();
    for item in items {
        let record = NewCrawledItem {
            task_id: &ctx.task_id,
            item_id: &item.id,
            title: &item.title,
            tags: &item.tags,
            page_urls: &item.page_urls,
        };
        if let Err(e) = repo.add_crawled_item(&record).await {
            ctx.log(
                LogLevel::Warn,
                format!("failed to record item {}: {e}", item.id),
            );
        }
    }
}

/// Downloads every page of `item`; true when all of them succeeded.
async fn download_item(
    ctx: &WorkerContext,
    downloader: &ProgressDownloader,
    item: &DiscoveredItem,
) -> Step<bool> {
    if item.page_urls.is_empty() {
        ctx.log(LogLevel::Warn, format!("item {} has no pages", item.id));
        return Ok(false);
    }

    for (page, url) in item.page_urls.iter().enumerate() {
        ctx.check_cancelled()?;
        let filename = item_page_filename(&item.id, page, url);
        match downloader
            .download_file(
                url,
                Path::new(&filename),
                Some(&ctx.task_id),
                Some(trace_progress()),
            )
            .await
        {
            Ok(file) => trace!(path = %file.path.display(), bytes = file.bytes, "page saved"),
            Err(e) => {
                ctx.log(
                    LogLevel::Warn,
                    format!("item {} page {page} failed: {e}", item.id),
                );
                return Ok(false);
            }
        }
    }
    ctx.log(
        LogLevel::Info,
        format!("item {} downloaded ({} pages)", item.id, item.page_urls.len()),
    );
    Ok(true)
}

/// Byte progress goes to the trace log only; task progress counts items.
fn trace_progress() -> ProgressCallback {
    Arc::new(|p: &DownloadProgress| {
        trace!(
            url = %p.url,
            filename = %p.filename,
            bytes = p.bytes_downloaded,
            total = p.bytes_total,
            percent = p.percent,
            "download progress"
        );
    })
}
