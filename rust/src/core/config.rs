use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub(crate) const CONFIG_FILE: &str = "chatfeed_config.json";

const DEFAULT_PAGE_SIZE: u32 = 25;
const DEFAULT_LIVE_ADDED_LIMIT: u32 = 1;

/// When live adds received on an open conversation start being applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LiveSubscribeMode {
    /// Once paging reaches the start of history.
    #[default]
    OnHistoryExhausted,
    /// After the first successful page.
    OnFirstPage,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub page_size: u32,
    pub live_added_limit: u32,
    pub live_subscribe: LiveSubscribeMode,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            live_added_limit: DEFAULT_LIVE_ADDED_LIMIT,
            live_subscribe: LiveSubscribeMode::default(),
        }
    }
}

impl FeedConfig {
    fn normalized(mut self) -> Self {
        self.page_size = self.page_size.max(1);
        self
    }
}

fn read_config(path: &Path) -> anyhow::Result<Option<FeedConfig>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("read {}", path.display())),
    };
    let cfg: FeedConfig =
        serde_json::from_slice(&bytes).with_context(|| format!("parse {}", path.display()))?;
    Ok(Some(cfg))
}

pub(crate) fn load_feed_config(data_dir: &str) -> FeedConfig {
    let path = Path::new(data_dir).join(CONFIG_FILE);
    match read_config(&path) {
        Ok(Some(cfg)) => cfg.normalized(),
        Ok(None) => FeedConfig::default(),
        Err(e) => {
            tracing::warn!("invalid feed config, using defaults: {e:#}");
            FeedConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg = load_feed_config(&dir.path().to_string_lossy());
        assert_eq!(cfg, FeedConfig::default());
        assert_eq!(cfg.page_size, 25);
        assert_eq!(cfg.live_added_limit, 1);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            r#"{"page_size": 10, "live_subscribe": "on_first_page", "unknown": true}"#,
        )
        .unwrap();
        let cfg = load_feed_config(&dir.path().to_string_lossy());
        assert_eq!(cfg.page_size, 10);
        assert_eq!(cfg.live_added_limit, 1);
        assert_eq!(cfg.live_subscribe, LiveSubscribeMode::OnFirstPage);
    }

    #[test]
    fn zero_page_size_is_clamped() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), r#"{"page_size": 0}"#).unwrap();
        let cfg = load_feed_config(&dir.path().to_string_lossy());
        assert_eq!(cfg.page_size, 1);
    }

    #[test]
    fn malformed_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join(CONFIG_FILE), "{not json").unwrap();
        let cfg = load_feed_config(&dir.path().to_string_lossy());
        assert_eq!(cfg, FeedConfig::default());
    }
}
