//! Shared User-Agent strings for catalog and generation-backend clients.

/// Browser User-Agent sent to the catalog and its image host, which reject
/// non-browser agents on the JSON endpoints.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Default User-Agent for catalog and image requests.
#[must_use]
pub(crate) fn default_browser_user_agent() -> &'static str {
    BROWSER_USER_AGENT
}

/// Default User-Agent for generation backend requests (identifies the tool).
#[must_use]
pub(crate) fn default_tool_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("taskhub/{version}")
}
