//! `veritas doctor`: diagnose the local setup.

use std::path::Path;
use std::process::Stdio;
use veritas_config::AppConfig;

pub async fn run(config_path: Option<&Path>) -> anyhow::Result<()> {
    println!("Veritas Doctor");
    println!("==============\n");

    let mut issues = 0;

    let default_path = AppConfig::config_dir().join("config.toml");
    let path = config_path.unwrap_or(&default_path);
    if !path.exists() {
        println!("  -- No config file at {} (defaults in use)", path.display());
    }

    let config = match super::load_config(config_path) {
        Ok(config) => {
            println!("  ok Config loaded");
            config
        }
        Err(e) => {
            println!("  !! Config invalid: {e:#}");
            println!("\n  1 issue found.");
            return Ok(());
        }
    };

    if config.has_api_key() {
        println!("  ok API key configured");
    } else {
        println!("  !! No API key: set VERITAS_API_KEY or add api_key to config.toml");
        issues += 1;
    }

    match super::open_store(&config).await {
        Ok(_) => println!("  ok CAS store at {}", config.cas.resolved_dir().display()),
        Err(e) => {
            println!("  !! {e:#}");
            issues += 1;
        }
    }

    if config.tools.is_enabled("run_sandbox") {
        let python = tokio::process::Command::new(&config.sandbox.python)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match python {
            Ok(status) if status.success() => {
                println!("  ok Sandbox interpreter {}", config.sandbox.python)
            }
            _ => {
                println!(
                    "  !! Sandbox interpreter '{}' not runnable; python snippets will fail",
                    config.sandbox.python
                );
                issues += 1;
            }
        }
    }

    println!();
    if issues == 0 {
        println!("  All checks passed!");
    } else {
        println!("  {issues} issue(s) found. See above for details.");
    }
    Ok(())
}
