#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! `trickler`: run the powder trickler against the simulator or a Raspberry Pi.

mod bench;
mod cli;
mod error_fmt;
mod rt;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use clap::Parser;
use eyre::{Result, WrapErr};
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{Layer, Registry, fmt};

use crate::bench::RunOpts;
use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{exit_code_for_error, format_error_json, humanize};

fn load_config(path: Option<&Path>) -> Result<trickler_config::Config> {
    let Some(path) = path else {
        return Ok(trickler_config::Config::default());
    };
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg: trickler_config::Config =
        toml::from_str(&text).wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

fn file_layer(logging: &trickler_config::Logging) -> Option<BoxedLayer> {
    let path = Path::new(logging.file.as_deref()?);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let name = path.file_name()?;
    let appender = match logging.rotation.as_deref() {
        Some("daily") => tracing_appender::rolling::daily(dir, name),
        Some("hourly") => tracing_appender::rolling::hourly(dir, name),
        _ => tracing_appender::rolling::never(dir, name),
    };
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);
    let level = logging.level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    Some(
        fmt::layer()
            .json()
            .with_writer(writer)
            .with_filter(filter)
            .boxed(),
    )
}

/// Console logs go to stderr; stdout is reserved for reports.
fn init_tracing(cli: &Cli, logging: &trickler_config::Logging) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&cli.log_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    let console: BoxedLayer = if cli.json {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_filter(filter)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_filter(filter)
            .boxed()
    };
    let mut layers = vec![console];
    layers.extend(file_layer(logging));
    if let Err(e) = tracing_subscriber::registry().with(layers).try_init() {
        eprintln!("tracing already initialized: {e}");
    }
}

fn dispatch(cli: &Cli, cfg: &trickler_config::Config, shutdown: &Arc<AtomicBool>) -> Result<()> {
    match &cli.cmd {
        Commands::Run {
            charges,
            skip_calibration,
            max_run_ms,
            rt,
        } => {
            let opts = RunOpts {
                charges: *charges,
                skip_calibration: *skip_calibration,
                max_run_ms: *max_run_ms,
                rt: rt.clone(),
            };
            bench::run(cfg, cli, &opts, shutdown)
        }
        Commands::Weigh { window_ms } => bench::weigh(cfg, cli, *window_ms),
        Commands::Zero => bench::zero(cfg, cli),
        Commands::SelfCheck => bench::self_check(cfg, cli),
    }
}

fn report(err: &eyre::Report) -> i32 {
    tracing::error!(error = %err, "trickler failed");
    if JSON_MODE.get().copied().unwrap_or(false) {
        println!("{}", format_error_json(err));
    } else {
        eprintln!("{}", humanize(err));
    }
    exit_code_for_error(err)
}

fn main() {
    let _ = color_eyre::install();
    let cli = Cli::parse();
    let _ = JSON_MODE.set(cli.json);

    let cfg = match load_config(cli.config.as_deref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing(&cli, &trickler_config::Logging::default());
            std::process::exit(report(&e));
        }
    };
    init_tracing(&cli, &cfg.logging);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            flag.store(true, Ordering::Relaxed);
        }) {
            tracing::warn!(error = %e, "ctrl-c handler not installed");
        }
    }

    if let Err(e) = dispatch(&cli, &cfg, &shutdown) {
        std::process::exit(report(&e));
    }
}
