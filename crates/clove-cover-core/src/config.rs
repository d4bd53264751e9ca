use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CoverError;
use crate::options::CoverOptions;
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "clove-cover.toml";
const SUPPORTED_VERSION: u32 = 1;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CoverConfig {
    pub version: Option<u32>,
    pub source: Option<SourceConfig>,
    pub instrument: Option<InstrumentConfig>,
    pub output: Option<OutputConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub roots: Option<Vec<PathBuf>>,
    pub suffix: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentConfig {
    pub strict: Option<bool>,
    pub dump_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct CoverConfigLoad {
    pub config: CoverConfig,
    pub warnings: Vec<String>,
}

pub fn load_cover_config_str(src: &str) -> Result<CoverConfigLoad, CoverError> {
    let value: toml::Value = toml::from_str(src).map_err(|e| CoverError::config(e.to_string()))?;
    let warnings = collect_unknown_keys(&value);
    let config: CoverConfig = value
        .try_into()
        .map_err(|e: toml::de::Error| CoverError::config(e.to_string()))?;
    config.validate_version()?;
    Ok(CoverConfigLoad { config, warnings })
}

pub fn load_cover_config_path(path: &Path) -> Result<CoverConfigLoad, CoverError> {
    let content = fs::read_to_string(path)
        .map_err(|e| CoverError::config(format!("failed to read {}: {}", path.display(), e)))?;
    load_cover_config_str(&content)
}

impl CoverConfig {
    fn validate_version(&self) -> Result<(), CoverError> {
        match self.version {
            None | Some(SUPPORTED_VERSION) => Ok(()),
            Some(other) => Err(CoverError::config(format!(
                "unsupported config version {} (expected {})",
                other, SUPPORTED_VERSION
            ))),
        }
    }

    /// Overlays configured values onto `options`; relative paths resolve against `base`.
    pub fn apply(&self, options: &mut CoverOptions, base: &Path) -> Result<(), CoverError> {
        if let Some(source) = &self.source {
            if let Some(roots) = &source.roots {
                if roots.is_empty() {
                    return Err(CoverError::config("source.roots must not be empty"));
                }
                options.source_roots = roots.iter().map(|root| base.join(root)).collect();
            }
            if let Some(suffix) = &source.suffix {
                let suffix = suffix.trim_start_matches('.');
                if suffix.is_empty() {
                    return Err(CoverError::config("source.suffix must not be empty"));
                }
                options.suffix = suffix.to_string();
            }
        }
        if let Some(instrument) = &self.instrument {
            if let Some(strict) = instrument.strict {
                options.strict = strict;
            }
            if let Some(dir) = &instrument.dump_dir {
                options.dump_dir = Some(base.join(dir));
            }
        }
        if let Some(path) = self.output.as_ref().and_then(|output| output.path.as_ref()) {
            options.out = Some(base.join(path));
        }
        Ok(())
    }
}

fn collect_unknown_keys(value: &toml::Value) -> Vec<String> {
    let mut warnings = Vec::new();
    let Some(table) = value.as_table() else {
        return warnings;
    };
    let allowed_top = ["version", "source", "instrument", "output"];
    for key in table.keys() {
        if !allowed_top.contains(&key.as_str()) {
            warnings.push(format!("unknown key: {}", key));
        }
    }
    collect_unknown_keys_table(table, "source", &["roots", "suffix"], &mut warnings);
    collect_unknown_keys_table(table, "instrument", &["strict", "dump_dir"], &mut warnings);
    collect_unknown_keys_table(table, "output", &["path"], &mut warnings);
    warnings
}

fn collect_unknown_keys_table(
    table: &toml::value::Table,
    name: &str,
    allowed: &[&str],
    warnings: &mut Vec<String>,
) {
    let Some(subtable) = table.get(name).and_then(toml::Value::as_table) else {
        return;
    };
    for key in subtable.keys() {
        if !allowed.contains(&key.as_str()) {
            warnings.push(format!("unknown key: {}.{}", name, key));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn unknown_keys_become_warnings() {
        let load = load_cover_config_str(
            r#"
version = 1
colour = "auto"

[source]
roots = ["lib", "src"]
extension = "clj"

[instrument]
strict = true
"#,
        )
        .expect("config");
        assert_eq!(
            load.warnings,
            vec![
                "unknown key: colour".to_string(),
                "unknown key: source.extension".to_string()
            ]
        );
        let mut options = CoverOptions::default().with_strict(false);
        load.config.apply(&mut options, Path::new("/proj")).unwrap();
        assert_eq!(
            options.source_roots,
            vec![PathBuf::from("/proj/lib"), PathBuf::from("/proj/src")]
        );
        assert!(options.strict);
    }

    #[test]
    fn rejects_unsupported_version_and_bad_values() {
        assert!(matches!(
            load_cover_config_str("version = 2"),
            Err(CoverError::Config(_))
        ));
        let load = load_cover_config_str("[source]\nsuffix = \".\"").unwrap();
        let mut options = CoverOptions::default();
        assert!(load.config.apply(&mut options, Path::new(".")).is_err());
    }
}
