pub mod ast;
pub mod builtins;
pub mod classify;
pub mod config;
pub mod driver;
pub mod env;
pub mod error;
pub mod eval;
pub mod form_to_string;
pub mod meta;
pub mod normalize;
pub mod options;
pub mod probe;
pub mod reader;
pub mod wrap;

use std::path::Path;

use config::{load_cover_config_path, CONFIG_FILE_NAME};
use driver::{Driver, ModuleOutput};
use error::{CoverError, WARN_TAG};
use options::CoverOptions;

pub use classify::{classify, Label};
pub use probe::{CaptureProbe, CoverageStore, Probe, CAPTURE_SYM};
pub use wrap::Wrapper;

/// Instruments and evaluates an in-memory module with default options.
pub fn instrument_source(module: &str, source: &str) -> Result<(ModuleOutput, Driver), CoverError> {
    let driver = Driver::new(CoverOptions::default());
    let output = driver.instrument_source(module, source)?;
    Ok((output, driver))
}

/// Applies `clove-cover.toml` from `dir` when present, printing any unknown-key warnings.
pub fn apply_project_config(options: &mut CoverOptions, dir: &Path) -> Result<bool, CoverError> {
    let path = dir.join(CONFIG_FILE_NAME);
    if !path.is_file() {
        return Ok(false);
    }
    apply_config_file(options, &path)?;
    Ok(true)
}

pub fn apply_config_file(options: &mut CoverOptions, path: &Path) -> Result<(), CoverError> {
    let load = load_cover_config_path(path)?;
    for warning in &load.warnings {
        eprintln!("{} {}: {}", WARN_TAG, path.display(), warning);
    }
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    load.config.apply(options, base)
}
