//! `veritas config`: configuration management commands.

use std::path::Path;
use veritas_config::AppConfig;

pub fn validate(config_path: Option<&Path>) -> anyhow::Result<()> {
    println!("Validating configuration...");

    let config = match super::load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("   Config error: {e:#}");
            return Err(e);
        }
    };
    if let Err(e) = config.validate() {
        println!("   Invalid: {e}");
        return Err(e.into());
    }
    println!("   Config parsed and validated");

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set VERITAS_API_KEY or OPENROUTER_API_KEY)".to_string());
    }
    if config.delegation.agents.is_empty() && config.tools.is_enabled("delegate") {
        warnings.push("delegate is enabled but no [delegation.agents] are configured".to_string());
    }
    for name in &config.tools.enabled {
        if !KNOWN_TOOLS.contains(&name.as_str()) {
            warnings.push(format!("Unknown tool in [tools].enabled: {name}"));
        }
    }

    if warnings.is_empty() {
        println!("   All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   warning: {w}");
        }
    }

    println!();
    println!("   Model:      {}", config.model.primary);
    if let Some(free) = &config.model.free {
        println!("   Free model: {free} (every {} calls)", config.model.free_interval);
    }
    println!("   Budget:     {} tool calls, {} turns", config.agent.max_tool_calls, config.agent.max_turns);
    println!("   Tools:      {}", config.tools.enabled.join(", "));
    println!("   CAS:        {}", config.cas.resolved_dir().display());
    Ok(())
}

const KNOWN_TOOLS: &[&str] = &[
    "search_code",
    "read_file",
    "run_sandbox",
    "search_papers",
    "scan_project",
    "delegate",
];

pub fn show(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = super::load_config(config_path)?;
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn init() {
    print!("{}", AppConfig::default_toml());
}

pub fn path() {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().ends_with("config.toml"));
    }

    #[test]
    fn default_tools_are_all_known() {
        let config = AppConfig::default();
        assert!(config.tools.enabled.iter().all(|t| KNOWN_TOOLS.contains(&t.as_str())));
    }

    #[test]
    fn default_toml_round_trips() {
        let parsed: AppConfig = toml::from_str(&AppConfig::default_toml()).unwrap();
        assert!(parsed.validate().is_ok());
        assert_eq!(parsed.agent.max_tool_calls, 128);
    }
}
