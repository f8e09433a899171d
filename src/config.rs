use serde::{Deserialize, Serialize};
use std::{
    fs::{read_to_string, write},
    path::{Path, PathBuf},
};

use crate::{error::CodexError, properties::NodeKind};

/// Names given to nodes created without one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultNames {
    pub region: String,
    pub location: String,
    pub shop: String,
    pub npc: String,
    pub group: String,
}

impl Default for DefaultNames {
    fn default() -> Self {
        DefaultNames {
            region: "New Region".to_string(),
            location: "New Location".to_string(),
            shop: "New Entry".to_string(),
            npc: "New NPC Journal".to_string(),
            group: "New Group Overview".to_string(),
        }
    }
}

impl DefaultNames {
    pub fn for_kind(&self, kind: NodeKind) -> &str {
        match kind {
            NodeKind::Region => &self.region,
            NodeKind::Location => &self.location,
            NodeKind::Shop => &self.shop,
            NodeKind::Npc => &self.npc,
            NodeKind::Group => &self.group,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CodexConfig {
    /// Run every read-modify-write on a node under that node's mutex. Turning this off restores
    /// last-writer-wins behavior for concurrent edits of the same node.
    pub serialize_node_writes: bool,
    /// Appended to an actor's name when an NPC is created for it.
    pub npc_name_suffix: String,
    pub default_shop_markup: f64,
    pub default_names: DefaultNames,
}

impl Default for CodexConfig {
    fn default() -> Self {
        CodexConfig {
            serialize_node_writes: true,
            npc_name_suffix: " - Journal".to_string(),
            default_shop_markup: 1.0,
            default_names: DefaultNames::default(),
        }
    }
}

pub trait CodexConfigProvider: Send + Sync {
    fn get_config(&self) -> Result<CodexConfig, CodexError>;
    fn set_config(&self, config: &CodexConfig) -> Result<(), CodexError>;
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TomlConfigProvider {
    path: PathBuf,
}

impl TomlConfigProvider {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        TomlConfigProvider {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CodexConfigProvider for TomlConfigProvider {
    fn get_config(&self) -> Result<CodexConfig, CodexError> {
        tracing::debug!("Attempting to read codex config from: {:?}", &self.path);
        if !self.path.exists() {
            tracing::debug!("Config file not found, using defaults.");
            return Ok(CodexConfig::default());
        }
        let content = read_to_string(&self.path)?;
        let config: CodexConfig = toml::from_str(&content)?;
        if !config.default_shop_markup.is_finite() || config.default_shop_markup < 0.0 {
            return Err(CodexError::Config(format!(
                "default_shop_markup must be a non-negative number, got {}",
                config.default_shop_markup
            )));
        }
        Ok(config)
    }

    fn set_config(&self, config: &CodexConfig) -> Result<(), CodexError> {
        tracing::debug!("Attempting to write codex config to: {:?}", &self.path);
        let toml_string = toml::to_string(config)?;
        write(&self.path, toml_string)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use test_log::test;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let provider = TomlConfigProvider::new(dir.path().join("codex.toml"));
        let config = provider.get_config().unwrap();
        assert_eq!(config, CodexConfig::default());
        assert!(config.serialize_node_writes);
        assert_eq!(config.default_names.for_kind(NodeKind::Shop), "New Entry");
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("codex.toml");
        std::fs::write(
            &path,
            "npc_name_suffix = \" (journal)\"\n\n[default_names]\nregion = \"Uncharted\"\n",
        )
        .unwrap();

        let config = TomlConfigProvider::new(&path).get_config().unwrap();
        assert_eq!(config.npc_name_suffix, " (journal)");
        assert_eq!(config.default_names.region, "Uncharted");
        assert_eq!(config.default_names.location, "New Location");
        assert_eq!(config.default_shop_markup, 1.0);
    }

    #[test]
    fn test_roundtrip_and_validation() {
        let dir = TempDir::new().unwrap();
        let provider = TomlConfigProvider::new(dir.path().join("codex.toml"));
        let config = CodexConfig {
            serialize_node_writes: false,
            ..Default::default()
        };
        provider.set_config(&config).unwrap();
        assert_eq!(provider.get_config().unwrap(), config);

        std::fs::write(provider.path(), "default_shop_markup = -2.0\n").unwrap();
        assert!(matches!(
            provider.get_config(),
            Err(CodexError::Config(_))
        ));
    }
}
