use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use crate::engine::{DEFAULT_REDIRECT_EXPANSION_LIMIT, EngineSettings};
use crate::filter::{DEFAULT_LIMIT, MAX_LIMIT, MIN_LIMIT, clamp_limit};
use crate::namespace::{CustomNamespace, NamespaceTable};

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WhatlinksConfig {
    #[serde(default)]
    pub backlinks: BacklinksSection,
    #[serde(default)]
    pub wiki: WikiSection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct BacklinksSection {
    pub default_limit: Option<usize>,
    pub max_limit: Option<usize>,
    pub redirect_expansion_limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    #[serde(default)]
    pub custom_namespaces: Vec<CustomNamespace>,
}

impl WhatlinksConfig {
    /// Largest page size a caller may ask for: config > 5000.
    pub fn max_limit(&self) -> usize {
        self.backlinks.max_limit.unwrap_or(MAX_LIMIT)
    }

    /// Page size when the caller gives none: env WHATLINKS_DEFAULT_LIMIT > config > 50.
    pub fn default_limit(&self) -> usize {
        self.default_limit_with_lookup(|key| env::var(key).ok())
    }

    /// Page size for redirect expansion: env WHATLINKS_REDIRECT_EXPANSION_LIMIT > config > 500.
    pub fn redirect_expansion_limit(&self) -> usize {
        self.redirect_expansion_limit_with_lookup(|key| env::var(key).ok())
    }

    fn default_limit_with_lookup<F>(&self, lookup_env: F) -> usize
    where
        F: Fn(&str) -> Option<String>,
    {
        let limit = env_limit(&lookup_env, "WHATLINKS_DEFAULT_LIMIT")
            .or(self.backlinks.default_limit)
            .unwrap_or(DEFAULT_LIMIT);
        limit.clamp(MIN_LIMIT, self.max_limit())
    }

    fn redirect_expansion_limit_with_lookup<F>(&self, lookup_env: F) -> usize
    where
        F: Fn(&str) -> Option<String>,
    {
        env_limit(&lookup_env, "WHATLINKS_REDIRECT_EXPANSION_LIMIT")
            .or(self.backlinks.redirect_expansion_limit)
            .map_or(DEFAULT_REDIRECT_EXPANSION_LIMIT, clamp_limit)
    }

    pub fn namespaces(&self) -> NamespaceTable {
        NamespaceTable::with_custom(&self.wiki.custom_namespaces)
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            namespaces: self.namespaces(),
            redirect_expansion_limit: self.redirect_expansion_limit(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        let limits = [
            ("backlinks.default_limit", self.backlinks.default_limit),
            ("backlinks.max_limit", self.backlinks.max_limit),
            (
                "backlinks.redirect_expansion_limit",
                self.backlinks.redirect_expansion_limit,
            ),
        ];
        for (key, value) in limits {
            if let Some(value) = value
                && !(MIN_LIMIT..=MAX_LIMIT).contains(&value)
            {
                bail!("{key} must be between {MIN_LIMIT} and {MAX_LIMIT}, got {value}");
            }
        }
        if let (Some(default_limit), Some(max_limit)) =
            (self.backlinks.default_limit, self.backlinks.max_limit)
            && default_limit > max_limit
        {
            bail!("backlinks.default_limit ({default_limit}) exceeds backlinks.max_limit ({max_limit})");
        }
        for namespace in &self.wiki.custom_namespaces {
            if namespace.name.trim().is_empty() {
                bail!("custom namespace name cannot be empty");
            }
            if namespace.id < 100 {
                bail!(
                    "custom namespace {} uses reserved id {} (custom ids start at 100)",
                    namespace.name,
                    namespace.id
                );
            }
        }
        Ok(())
    }
}

fn env_limit<F>(lookup_env: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup_env(key)?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    match trimmed.parse::<usize>() {
        Ok(limit) => Some(limit),
        Err(_) => {
            tracing::warn!(key, value = trimmed, "ignoring non-numeric limit override");
            None
        }
    }
}

/// Load and validate a config file. Returns defaults if the file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<WhatlinksConfig> {
    if !config_path.exists() {
        return Ok(WhatlinksConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: WhatlinksConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    parsed
        .validate()
        .with_context(|| format!("invalid configuration in {}", config_path.display()))?;
    Ok(parsed)
}
