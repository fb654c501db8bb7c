//! Config command implementation.
//!
//! Keys are dotted paths into the configuration file, e.g.
//! `loopback.step_interval`.

use anyhow::{bail, Context, Result};
use pairlink_core::config::Config;
use serde_json::Value;

use super::{ConfigAction, ConfigArgs};

/// Run the config command.
pub fn run(args: ConfigArgs) -> Result<()> {
    match args.action {
        ConfigAction::Get { key } => {
            let config = Config::load().context("Failed to load configuration")?;
            let value = get(&config, &key)?;
            println!("{}", display_value(&value));
        }
        ConfigAction::Set { key, value } => {
            let config = Config::load().context("Failed to load configuration")?;
            let updated = set(&config, &key, &value)?;
            updated.save().context("Failed to save configuration")?;
            println!("✓ {key} = {}", display_value(&get(&updated, &key)?));
        }
        ConfigAction::Show => {
            let config = Config::load().context("Failed to load configuration")?;
            for key in keys(&config)? {
                println!("{key} = {}", display_value(&get(&config, &key)?));
            }
        }
        ConfigAction::List => {
            for key in keys(&Config::default())? {
                println!("{key}");
            }
        }
        ConfigAction::Path => println!("{}", Config::config_path().display()),
        ConfigAction::Reset => {
            Config::default()
                .save()
                .context("Failed to save configuration")?;
            println!("✓ Configuration reset to defaults");
        }
    }
    Ok(())
}

fn pointer(key: &str) -> String {
    format!("/{}", key.replace('.', "/"))
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "(unset)".to_string(),
        other => other.to_string(),
    }
}

/// Every leaf key of the configuration, in file order.
fn keys(config: &Config) -> Result<Vec<String>> {
    let tree = serde_json::to_value(config)?;
    let mut keys = Vec::new();
    if let Value::Object(sections) = tree {
        for (section, fields) in sections {
            if let Value::Object(fields) = fields {
                keys.extend(fields.keys().map(|field| format!("{section}.{field}")));
            }
        }
    }
    Ok(keys)
}

fn get(config: &Config, key: &str) -> Result<Value> {
    let tree = serde_json::to_value(config)?;
    match tree.pointer(&pointer(key)) {
        Some(value) if !value.is_object() => Ok(value.clone()),
        _ => bail!("Unknown configuration key: {key}\nRun 'pairlink config list' to see all keys."),
    }
}

fn set(config: &Config, key: &str, raw: &str) -> Result<Config> {
    let current = get(config, key)?;
    let value = match current {
        Value::Bool(_) => Value::Bool(
            raw.parse()
                .with_context(|| format!("{key} expects true or false"))?,
        ),
        Value::Number(_) => Value::from(
            raw.parse::<u64>()
                .with_context(|| format!("{key} expects a whole number"))?,
        ),
        Value::Null | Value::String(_) if raw.is_empty() || raw == "none" => Value::Null,
        _ => Value::String(raw.to_string()),
    };

    let mut tree = serde_json::to_value(config)?;
    if let Some(slot) = tree.pointer_mut(&pointer(key)) {
        *slot = value;
    }
    let updated: Config =
        serde_json::from_value(tree).with_context(|| format!("Invalid value for {key}: {raw}"))?;
    updated.validate()?;
    Ok(updated)
}
