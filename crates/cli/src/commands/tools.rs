//! `veritas tools`: list the tools offered to the model.

use std::path::Path;
use std::sync::Arc;
use veritas_agent::offered_tools;
use veritas_cas::MemoryStore;

pub async fn run(config_path: Option<&Path>, root: &Path) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    let toolkit = super::toolkit(&config, root, Arc::new(MemoryStore::new()))?;

    let defs = offered_tools(&toolkit.registry, &config);
    println!("  {} tool(s) for {}", defs.len(), toolkit.workspace.root().display());
    println!();
    for def in defs {
        let required = def.parameters["required"]
            .as_array()
            .map(|r| r.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        println!("  {:<14} {}", def.name, def.description);
        if !required.is_empty() {
            println!("  {:<14} required: {required}", "");
        }
    }
    Ok(())
}
