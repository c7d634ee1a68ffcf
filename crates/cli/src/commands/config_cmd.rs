//! `agentbus config`: Configuration management commands.

use agentbus_config::AppConfig;

const REDACTED: &str = "[REDACTED]";

/// Copy of `config` with every API key masked.
fn redacted(config: &AppConfig) -> AppConfig {
    let mut config = config.clone();
    if config.api_key.is_some() {
        config.api_key = Some(REDACTED.into());
    }
    for agent in &mut config.agents {
        if agent.api_key.is_some() {
            agent.api_key = Some(REDACTED.into());
        }
    }
    config
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    match AppConfig::load() {
        Ok(config) => {
            println!("   ✅ Config parsed successfully");

            let mut warnings = Vec::new();

            if config.agents.is_empty() {
                warnings.push("No [[agents]] configured; `agentbus demo` will generate echo agents");
            }

            if config.agents.iter().any(|a| a.api_key.is_none() && a.model != "echo") {
                warnings.push("Some non-echo agents have no API key (set AGENTBUS_API_KEY)");
            }

            if warnings.is_empty() {
                println!("   ✅ All checks passed");
            } else {
                println!();
                for w in &warnings {
                    println!("   ⚠️  {w}");
                }
            }

            println!();
            println!(
                "   Gateway:   {}:{}",
                config.gateway.host, config.gateway.port
            );
            println!("   Ring:      {} entries", config.broker.ring_capacity);
            println!("   Agents:    {}", config.agents.len());
            match config.worker.max_queue {
                Some(max) => println!("   Queue:     {max} per worker"),
                None => println!("   Queue:     unbounded"),
            }
        }
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    }

    Ok(())
}

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&redacted(&config))?;
    println!("{toml_str}");
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = AppConfig::config_dir().join("config.toml");
    println!("{}", config_path.display());
    Ok(())
}
