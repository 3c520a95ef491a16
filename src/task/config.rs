//! Typed task configuration, keyed by task type.
//!
//! Configuration arrives as a JSON object. It is parsed into [`TaskConfig`] at
//! creation time so malformed payloads are rejected before anything is
//! persisted, and parsed again by the worker before execution.

use serde::{Deserialize, Serialize};

use super::error::TaskError;
use super::item::TaskType;

/// Default result cap for catalog queries.
pub const DEFAULT_CRAWL_LIMIT: u32 = 50;

/// Configuration for one task, by type.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskConfig {
    /// Catalog crawl.
    Crawl(CrawlConfig),
    /// Image generation.
    Generate(GenerateConfig),
    /// A type with no executor yet; the object is kept as submitted.
    Extension {
        /// Declared type.
        task_type: TaskType,
        /// Raw configuration object.
        raw: serde_json::Map<String, serde_json::Value>,
    },
}

impl TaskConfig {
    /// Parses and validates `raw` for `task_type`.
    ///
    /// # Errors
    ///
    /// Returns [`TaskError::InvalidConfig`] when `raw` is not a JSON object, does
    /// not match the type's schema, or fails validation.
    pub fn parse(task_type: TaskType, raw: &str) -> Result<Self, TaskError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| TaskError::invalid_config(task_type.as_str(), e))?;
        let serde_json::Value::Object(object) = value else {
            return Err(TaskError::invalid_config(
                task_type.as_str(),
                "config must be a JSON object",
            ));
        };

        match task_type {
            TaskType::Crawl => {
                let config: CrawlConfig =
                    serde_json::from_value(serde_json::Value::Object(object))
                        .map_err(|e| TaskError::invalid_config("crawl", e))?;
                config
                    .target()
                    .map_err(|reason| TaskError::invalid_config("crawl", reason))?;
                Ok(Self::Crawl(config))
            }
            TaskType::Generate => {
                let config: GenerateConfig =
                    serde_json::from_value(serde_json::Value::Object(object))
                        .map_err(|e| TaskError::invalid_config("generate", e))?;
                config
                    .validate()
                    .map_err(|reason| TaskError::invalid_config("generate", reason))?;
                Ok(Self::Generate(config))
            }
            TaskType::Train | TaskType::Tag | TaskType::Classify => Ok(Self::Extension {
                task_type,
                raw: object,
            }),
        }
    }

    /// The task type this configuration belongs to.
    #[must_use]
    pub fn task_type(&self) -> TaskType {
        match self {
            Self::Crawl(_) => TaskType::Crawl,
            Self::Generate(_) => TaskType::Generate,
            Self::Extension { task_type, .. } => *task_type,
        }
    }
}

/// Which catalog query a crawl runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CrawlSubkind {
    /// Search by tag/keyword.
    Tag,
    /// All works of one author.
    User,
    /// A single work.
    Illust,
}

/// Crawl task configuration as submitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrawlConfig {
    pub subkind: CrawlSubkind,
    #[serde(default)]
    pub query: Option<String>,
    /// Sort order for tag search (`date_d`, `date`, `popular_d`, ...).
    #[serde(default)]
    pub order: Option<String>,
    /// Content mode for tag search (`all`, `safe`, `r18`).
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub limit: Option<u32>,
    #[serde(default, rename = "userID")]
    pub user_id: Option<String>,
    #[serde(default, rename = "illustID")]
    pub illust_id: Option<String>,
    /// Politeness delay before each request, in milliseconds.
    #[serde(default)]
    pub delay: Option<u64>,
    #[serde(default)]
    pub proxy_enabled: bool,
    #[serde(default, rename = "proxyURL")]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub cookie: Option<String>,
}

/// Validated catalog query derived from a [`CrawlConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrawlTarget {
    /// Tag search.
    Tag {
        query: String,
        order: String,
        mode: String,
        limit: u32,
    },
    /// Author listing.
    User { user_id: String, limit: u32 },
    /// Single item.
    Illust { illust_id: String },
}

impl CrawlConfig {
    /// Resolves the query this config asks for.
    ///
    /// # Errors
    ///
    /// Returns a reason when the field required by the subkind is missing or blank,
    /// or when `limit` is zero.
    pub fn target(&self) -> Result<CrawlTarget, String> {
        let limit = self.limit.unwrap_or(DEFAULT_CRAWL_LIMIT);
        if limit == 0 {
            return Err("limit must be greater than zero".to_string());
        }
        match self.subkind {
            CrawlSubkind::Tag => Ok(CrawlTarget::Tag {
                query: required(self.query.as_deref(), "query")?,
                order: non_blank(self.order.as_deref()).unwrap_or("date_d").to_string(),
                mode: non_blank(self.mode.as_deref()).unwrap_or("all").to_string(),
                limit,
            }),
            CrawlSubkind::User => Ok(CrawlTarget::User {
                user_id: required(self.user_id.as_deref(), "userID")?,
                limit,
            }),
            CrawlSubkind::Illust => Ok(CrawlTarget::Illust {
                illust_id: required(self.illust_id.as_deref(), "illustID")?,
            }),
        }
    }

    /// Proxy URL to use, when the proxy is enabled and set.
    #[must_use]
    pub fn effective_proxy(&self) -> Option<&str> {
        if self.proxy_enabled {
            non_blank(self.proxy_url.as_deref())
        } else {
            None
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn required(value: Option<&str>, field: &str) -> Result<String, String> {
    non_blank(value)
        .map(str::to_string)
        .ok_or_else(|| format!("{field} is required"))
}

/// A LoRA overlay appended to the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoraOverlay {
    pub name: String,
    #[serde(default = "default_lora_weight")]
    pub weight: f64,
}

fn default_lora_weight() -> f64 {
    1.0
}

/// Generation task configuration as submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateConfig {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default = "default_steps")]
    pub steps: u32,
    #[serde(default = "default_cfg_scale")]
    pub cfg_scale: f64,
    #[serde(default = "default_dimension")]
    pub width: u32,
    #[serde(default = "default_dimension")]
    pub height: u32,
    /// `-1` asks the backend for a random seed.
    #[serde(default = "default_seed")]
    pub seed: i64,
    /// Checkpoint to load; empty keeps the backend's current model.
    #[serde(default)]
    pub model: String,
    #[serde(default = "default_sampler")]
    pub sampler: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default, rename = "enableHR")]
    pub enable_hr: bool,
    #[serde(default)]
    pub loras: Vec<LoraOverlay>,
}

fn default_steps() -> u32 {
    20
}

fn default_cfg_scale() -> f64 {
    7.0
}

fn default_dimension() -> u32 {
    512
}

fn default_seed() -> i64 {
    -1
}

fn default_sampler() -> String {
    "Euler a".to_string()
}

fn default_batch_size() -> u32 {
    1
}

impl GenerateConfig {
    /// Checks field ranges.
    ///
    /// # Errors
    ///
    /// Returns a reason naming the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.prompt.trim().is_empty() {
            return Err("prompt is required".to_string());
        }
        if !(1..=150).contains(&self.steps) {
            return Err(format!("steps must be between 1 and 150, got {}", self.steps));
        }
        if !(self.cfg_scale > 0.0 && self.cfg_scale <= 30.0) {
            return Err(format!(
                "cfgScale must be in (0, 30], got {}",
                self.cfg_scale
            ));
        }
        for (field, value) in [("width", self.width), ("height", self.height)] {
            if !(64..=2048).contains(&value) {
                return Err(format!("{field} must be between 64 and 2048, got {value}"));
            }
        }
        if !(1..=16).contains(&self.batch_size) {
            return Err(format!(
                "batchSize must be between 1 and 16, got {}",
                self.batch_size
            ));
        }
        if let Some(lora) = self.loras.iter().find(|l| l.name.trim().is_empty()) {
            return Err(format!("lora name must not be empty (weight {})", lora.weight));
        }
        Ok(())
    }
}
