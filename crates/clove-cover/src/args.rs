use std::path::PathBuf;

use clove_cover_core::options::CoverOptions;

#[derive(Debug, Default, PartialEq)]
pub enum ConfigChoice {
    /// Look for `clove-cover.toml` in the working directory.
    #[default]
    Project,
    Path(PathBuf),
    Disabled,
}

#[derive(Debug, Default, PartialEq)]
pub struct CliArgs {
    pub src: Vec<PathBuf>,
    pub config: ConfigChoice,
    pub dump: Option<PathBuf>,
    pub strict: bool,
    pub out: Option<PathBuf>,
    pub modules: Vec<String>,
    pub show_version: bool,
    pub show_help: bool,
}

fn value_for(flag: &str, args: &mut impl Iterator<Item = String>) -> Result<String, String> {
    args.next()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| format!("{} requires a value", flag))
}

pub fn parse_args(raw: Vec<String>) -> Result<CliArgs, String> {
    let mut parsed = CliArgs::default();
    let mut args = raw.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--src" => parsed.src.push(PathBuf::from(value_for("--src", &mut args)?)),
            "--config" => {
                parsed.config = ConfigChoice::Path(PathBuf::from(value_for("--config", &mut args)?))
            }
            "--no-config" => parsed.config = ConfigChoice::Disabled,
            "--dump" => parsed.dump = Some(PathBuf::from(value_for("--dump", &mut args)?)),
            "--strict" => parsed.strict = true,
            "--out" => parsed.out = Some(PathBuf::from(value_for("--out", &mut args)?)),
            "--version" => parsed.show_version = true,
            "-h" | "--help" => parsed.show_help = true,
            "--" => parsed.modules.extend(args.by_ref()),
            opt if opt.starts_with('-') => return Err(format!("unknown option: {}", opt)),
            _ => parsed.modules.push(arg),
        }
    }
    Ok(parsed)
}

impl CliArgs {
    /// Layers command-line flags over options already built from defaults and config.
    pub fn apply(&self, options: &mut CoverOptions) {
        if !self.src.is_empty() {
            options.source_roots = self.src.clone();
        }
        if self.strict {
            options.strict = true;
        }
        if self.dump.is_some() {
            options.dump_dir = self.dump.clone();
        }
        if self.out.is_some() {
            options.out = self.out.clone();
        }
    }
}
