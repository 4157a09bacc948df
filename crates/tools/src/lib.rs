//! Research tools for Veritas.
//!
//! Tools give the agent read access to a workspace and a few ways to
//! gather evidence:
//! - `search_code`: symbol-aware code search ([`code_search`])
//! - `read_file`: line ranges with citations ([`file_read`])
//! - `run_sandbox`: seeded, time-boxed snippet execution ([`sandbox`])
//! - `search_papers`: literature lookup over an [`EvidenceSource`]
//!
//! Which tools are exposed is decided by `[tools].enabled`.

pub mod code_search;
pub mod file_read;
pub mod paper_search;
pub mod sandbox;
pub mod symbol_index;
pub mod workspace;

pub use code_search::{CodeSearcher, SearchCodeTool, SearchHit, query_terms};
pub use file_read::ReadFileTool;
pub use paper_search::{EvidenceSource, PaperRecord, SearchPapersTool, SemanticScholarSource};
pub use sandbox::{RunSandboxTool, Sandbox, SandboxOutcome, SnippetLanguage};
pub use symbol_index::{FileSymbols, SymbolIndex};
pub use workspace::{Workspace, WorkspaceFile};

use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use veritas_cas::ContentStore;
use veritas_config::AppConfig;
use veritas_core::error::ToolError;
use veritas_core::tool::ToolRegistry;

/// Tool names handled by the orchestrator itself rather than the registry.
pub const ORCHESTRATOR_TOOLS: &[&str] = &["scan_project", "delegate"];

/// Default hit limit for `search_code`.
pub const DEFAULT_SEARCH_RESULTS: usize = 20;

/// Everything the orchestrator needs from this crate for one session.
pub struct Toolkit {
    pub workspace: Arc<Workspace>,
    pub searcher: Arc<CodeSearcher>,
    pub registry: ToolRegistry,
}

/// Build the registry for `root` from the `[tools]` configuration.
///
/// `search_papers` is only registered when `papers` is supplied.
pub fn build_toolkit(
    config: &AppConfig,
    root: &Path,
    store: Arc<dyn ContentStore>,
    papers: Option<Arc<dyn EvidenceSource>>,
) -> Result<Toolkit, ToolError> {
    let workspace = Arc::new(Workspace::new(root)?);
    let index = Arc::new(SymbolIndex::new(store));
    let max_bytes = config.planner.max_file_bytes;
    let searcher = Arc::new(CodeSearcher::new(workspace.clone(), index, max_bytes));

    let mut registry = ToolRegistry::new();
    for name in &config.tools.enabled {
        match name.as_str() {
            "search_code" => registry.register(Arc::new(SearchCodeTool::new(
                searcher.clone(),
                DEFAULT_SEARCH_RESULTS,
            ))),
            "read_file" => registry.register(Arc::new(ReadFileTool::new(workspace.clone(), max_bytes))),
            "run_sandbox" => {
                registry.register(Arc::new(RunSandboxTool::new(Sandbox::new(&config.sandbox))))
            }
            "search_papers" => match &papers {
                Some(source) => registry.register(Arc::new(SearchPapersTool::new(source.clone()))),
                None => debug!("search_papers enabled but no evidence source configured"),
            },
            other if ORCHESTRATOR_TOOLS.contains(&other) => {}
            other => warn!(tool = other, "Unknown tool in [tools].enabled, ignoring"),
        }
    }

    debug!(tools = ?registry.names(), root = %workspace.root().display(), "Tool registry built");
    Ok(Toolkit {
        workspace,
        searcher,
        registry,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use veritas_cas::MemoryStore;

    struct NoPapers;

    #[async_trait]
    impl EvidenceSource for NoPapers {
        fn name(&self) -> &str {
            "none"
        }
        async fn search(&self, _q: &str, _l: usize) -> Result<Vec<PaperRecord>, ToolError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn default_config_registers_file_tools() {
        let dir = tempfile::tempdir().unwrap();
        let kit = build_toolkit(&AppConfig::default(), dir.path(), Arc::new(MemoryStore::new()), None)
            .unwrap();
        assert_eq!(kit.registry.names(), vec!["read_file", "run_sandbox", "search_code"]);
    }

    #[test]
    fn papers_registered_with_source() {
        let dir = tempfile::tempdir().unwrap();
        let kit = build_toolkit(
            &AppConfig::default(),
            dir.path(),
            Arc::new(MemoryStore::new()),
            Some(Arc::new(NoPapers)),
        )
        .unwrap();
        assert!(kit.registry.get("search_papers").is_some());
        assert_eq!(kit.registry.len(), 4);
    }

    #[test]
    fn registry_follows_enabled_list() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.tools.enabled = vec!["read_file".into(), "bogus".into()];
        let kit = build_toolkit(&config, dir.path(), Arc::new(MemoryStore::new()), None).unwrap();
        assert_eq!(kit.registry.names(), vec!["read_file"]);
        let defs = kit.registry.definitions();
        assert_eq!(defs.len(), 1);
    }

    #[test]
    fn missing_root_is_an_error() {
        let result = build_toolkit(
            &AppConfig::default(),
            Path::new("/definitely/not/here/veritas"),
            Arc::new(MemoryStore::new()),
            None,
        );
        assert!(result.is_err());
    }
}
