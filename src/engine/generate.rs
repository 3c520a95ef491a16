//! Generation routine: one backend batch, images written under the task directory.

use std::time::Duration;

use serde_json::json;

use super::worker::{Halt, Step, WorkerContext};
use crate::download::{ClientConfig, RetryHttpClient};
use crate::events::LogLevel;
use crate::generate::{GenerationClient, save_images};
use crate::task::GenerateConfig;
use crate::user_agent;

const PROGRESS_CLIENT_READY: i64 = 10;
const PROGRESS_BATCH_RECEIVED: i64 = 70;
const PROGRESS_IMAGES_SAVED: i64 = 90;

fn client_config(ctx: &WorkerContext) -> ClientConfig {
    let settings = &ctx.settings;
    ClientConfig {
        user_agent: user_agent::default_tool_user_agent(),
        referer: None,
        accept_language: None,
        cookie: None,
        proxy: None,
        request_delay: Duration::ZERO,
        connect_timeout: settings.connect_timeout,
        request_timeout: settings.request_timeout,
        retry_policy: settings.retry_policy(),
        proxy_probe_url: settings.proxy_probe_url.clone(),
    }
}

pub(crate) async fn run(ctx: &WorkerContext, config: &GenerateConfig) -> Step<()> {
    ctx.check_cancelled()?;

    let http = RetryHttpClient::new(client_config(ctx)).map_err(|e| Halt::Failed(e.to_string()))?;
    let client = GenerationClient::new(http, ctx.settings.generation_base_url.clone());
    ctx.progress(PROGRESS_CLIENT_READY).await?;

    ctx.check_cancelled()?;
    ctx.log(
        LogLevel::Info,
        format!(
            "generating {} image(s) at {}x{}, {} steps",
            config.batch_size, config.width, config.height, config.steps
        ),
    );
    let batch = match client.generate(config).await {
        Ok(batch) => batch,
        Err(e) => {
            ctx.log(LogLevel::Error, format!("generation failed: {e}"));
            return Err(Halt::Failed(e.to_string()));
        }
    };
    if batch.images.is_empty() {
        ctx.log(LogLevel::Warn, "backend returned no images");
    }
    ctx.set_found(batch.images.len()).await?;
    ctx.progress(PROGRESS_BATCH_RECEIVED).await?;

    ctx.check_cancelled()?;
    let output_dir = ctx
        .settings
        .download_root
        .join(format!("task_{}", ctx.task_id));
    let files = save_images(&batch.images, &output_dir)
        .await
        .map_err(|e| Halt::Failed(e.to_string()))?;
    ctx.set_downloaded(files.len()).await?;
    ctx.progress(PROGRESS_IMAGES_SAVED).await?;

    let files: Vec<String> = files.iter().map(|p| p.display().to_string()).collect();
    ctx.set_result(&json!({
        "images_generated": batch.images.len(),
        "images_saved": files.len(),
        "output_dir": output_dir.display().to_string(),
        "files": files,
        "info": batch.info,
    }))
    .await?;
    ctx.log(
        LogLevel::Info,
        format!("generation finished: {} image(s) saved", files.len()),
    );
    ctx.progress(100).await
}
