pub mod ask;
pub mod config_cmd;
pub mod doctor;
pub mod tools;

use anyhow::Context;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use veritas_cas::{ContentStore, FileStore};
use veritas_config::AppConfig;
use veritas_tools::{EvidenceSource, SemanticScholarSource, Toolkit, build_toolkit};

/// Load `path` if given, else the default config file. Environment
/// overrides apply either way.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::load_with_env(path),
        None => AppConfig::load(),
    };
    config.context("Failed to load config")
}

pub async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn ContentStore>> {
    let dir = config.cas.resolved_dir();
    let store = FileStore::open(&dir)
        .await
        .with_context(|| format!("Failed to open CAS store at {}", dir.display()))?;
    Ok(Arc::new(store))
}

/// The literature source, when `search_papers` is enabled and the client
/// can be built.
fn paper_source(config: &AppConfig) -> Option<Arc<dyn EvidenceSource>> {
    if !config.tools.is_enabled("search_papers") {
        return None;
    }
    match SemanticScholarSource::new(Duration::from_secs(config.agent.call_timeout_secs)) {
        Ok(source) => Some(Arc::new(source)),
        Err(e) => {
            warn!(error = %e, "search_papers disabled");
            None
        }
    }
}

pub fn toolkit(
    config: &AppConfig,
    root: &Path,
    store: Arc<dyn ContentStore>,
) -> anyhow::Result<Toolkit> {
    build_toolkit(config, root, store, paper_source(config))
        .with_context(|| format!("Cannot use {} as a workspace", root.display()))
}
