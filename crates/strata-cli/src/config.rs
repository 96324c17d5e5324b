use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use strata_codec::CodecConfig;
use strata_tree::LineageConfig;

/// Settings read from `--config`. Every section is optional.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub codec: CodecConfig,
    pub lineage: LineageConfig,
    pub scan: ScanConfig,
}

/// How directories are walked when snapshotting.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub follow_links: bool,
    /// Include entries whose name starts with a dot.
    pub include_hidden: bool,
}

impl CliConfig {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_means_defaults() {
        assert_eq!(CliConfig::load(None).unwrap(), CliConfig::default());
    }

    #[test]
    fn sections_fill_in_defaults() {
        let config = CliConfig::parse(
            r#"
            [codec]
            verify_checksum = false

            [lineage]
            reroot_threshold = 8

            [scan]
            include_hidden = true
            "#,
        )
        .unwrap();
        assert!(!config.codec.verify_checksum);
        assert_eq!(config.codec.max_nesting, CodecConfig::default().max_nesting);
        assert_eq!(config.lineage.reroot_threshold, 8);
        assert!(config.scan.include_hidden);
        assert!(!config.scan.follow_links);
    }

    #[test]
    fn unknown_types_are_rejected() {
        assert!(CliConfig::parse("[lineage]\nreroot_threshold = \"many\"").is_err());
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("strata.toml");
        std::fs::write(&path, "[codec]\nmax_chain_len = 3\n").unwrap();
        let config = CliConfig::load(Some(&path)).unwrap();
        assert_eq!(config.codec.max_chain_len, 3);

        let err = CliConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("absent.toml"));
    }
}
