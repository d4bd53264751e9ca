use std::env;
use std::fs;
use std::path::Path;

mod args;

use args::{parse_args, CliArgs, ConfigChoice};
use clove_cover_core::driver::Driver;
use clove_cover_core::error::{format_error, CoverError, ERROR_TAG};
use clove_cover_core::options::CoverOptions;
use clove_cover_core::probe::lock_store;
use clove_cover_core::{apply_config_file, apply_project_config};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "CLOVE_COVER_LOG";

fn help() -> ! {
    println!("Usage: clove-cover [--src DIR]... [--config PATH] [--no-config] [--dump DIR] [--strict] [--out FILE] [--version] MODULE...");
    println!();
    println!("Options:");
    println!("  --src DIR             Source root searched for modules (repeatable, default: src)");
    println!("  --config PATH         Read settings from PATH instead of ./clove-cover.toml");
    println!("  --no-config           Ignore clove-cover.toml");
    println!("  --dump DIR            Write each instrumented module to DIR/<module>.clv");
    println!("  --strict              Fail on forms that cannot be classified");
    println!("  --out FILE            Write probe sites and hit counts to FILE as JSON");
    println!("  --version             Show version");
    println!("  -h, --help            Show this help");
    println!();
    println!("Environment:");
    println!("  {}       Log filter (e.g. debug, clove_cover_core=trace)", LOG_ENV);
    std::process::exit(0);
}

fn unknown_option(message: &str) -> ! {
    eprintln!("{}", message);
    help();
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn report(err: &CoverError) -> ! {
    for line in format_error(err) {
        eprintln!("{}", line);
    }
    std::process::exit(1);
}

fn build_options(cli: &CliArgs) -> Result<CoverOptions, CoverError> {
    let mut options = CoverOptions::default();
    match &cli.config {
        ConfigChoice::Project => {
            let cwd = env::current_dir()?;
            if apply_project_config(&mut options, &cwd)? {
                debug!(dir = %cwd.display(), "applied project config");
            }
        }
        ConfigChoice::Path(path) => apply_config_file(&mut options, path)?,
        ConfigChoice::Disabled => {}
    }
    cli.apply(&mut options);
    Ok(options)
}

fn write_report(driver: &Driver, out: &Path) -> Result<(), CoverError> {
    let json = lock_store(&driver.store()).to_json()?;
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(out, json)
        .map_err(|err| CoverError::io(format!("failed to write {}: {}", out.display(), err)))
}

fn print_summary(driver: &Driver, modules: &[String]) {
    let store = driver.store();
    let store = lock_store(&store);
    for module in modules {
        let (total, hit) = store.module_sites(module).fold((0, 0), |(total, hit), site| {
            (total + 1, hit + usize::from(store.hits(site.id) > 0))
        });
        println!("{}: {}/{} forms covered", module, hit, total);
    }
}

fn main() {
    let cli = match parse_args(env::args().skip(1).collect()) {
        Ok(cli) => cli,
        Err(message) => unknown_option(&message),
    };
    if cli.show_help {
        help();
    }
    if cli.show_version {
        println!("clove-cover {}", env!("CARGO_PKG_VERSION"));
        return;
    }
    if cli.modules.is_empty() {
        eprintln!("{} no module given", ERROR_TAG);
        std::process::exit(1);
    }
    init_logging();

    let options = build_options(&cli).unwrap_or_else(|err| report(&err));
    let out = options.out.clone();
    let driver = Driver::new(options);
    for module in &cli.modules {
        if let Err(err) = driver.instrument_module(module) {
            report(&err);
        }
    }
    print_summary(&driver, &cli.modules);
    if let Some(out) = out {
        if let Err(err) = write_report(&driver, &out) {
            report(&err);
        }
    }
}
