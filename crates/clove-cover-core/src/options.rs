use std::env;
use std::path::PathBuf;

pub const STRICT_ENV: &str = "CLOVE_COVER_STRICT";
pub const DUMP_ENV: &str = "CLOVE_COVER_DUMP";
pub const DEFAULT_SUFFIX: &str = "clv";

fn env_flag(name: &str) -> bool {
    let Ok(value) = env::var(name) else {
        return false;
    };
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

pub fn strict_from_env() -> bool {
    env_flag(STRICT_ENV)
}

pub fn dump_dir_from_env() -> Option<PathBuf> {
    env::var_os(DUMP_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

#[derive(Clone, Debug)]
pub struct CoverOptions {
    /// Directories searched in order for module files.
    pub source_roots: Vec<PathBuf>,
    pub suffix: String,
    pub strict: bool,
    /// When set, instrumented modules are written here for inspection.
    pub dump_dir: Option<PathBuf>,
    pub out: Option<PathBuf>,
}

impl Default for CoverOptions {
    fn default() -> Self {
        Self {
            source_roots: vec![PathBuf::from("src")],
            suffix: DEFAULT_SUFFIX.to_string(),
            strict: strict_from_env(),
            dump_dir: dump_dir_from_env(),
            out: None,
        }
    }
}

impl CoverOptions {
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_roots = vec![root.into()];
        self
    }

    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn with_dump_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.dump_dir = dir;
        self
    }
}
