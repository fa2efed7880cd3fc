use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use clap::{Parser, Subcommand};
use photo_import::{
    config::{resolve_paths, GlobalConfig},
    copy_file::CancelToken,
    timestamp::parse_timestamp,
    watermark::format_stored,
    RunOptions, Selection, Session, SqliteWatermarkStore,
};
use tracing_subscriber::EnvFilter;

// cargo run -- import fz300 --device /media/card
// cargo run -- --config ./user.yml scan fz300
#[derive(Parser, Debug)]
#[command(author, version, about = "Import new photos and videos from memory cards")]
struct Cli {
    /// User config (YAML). Defaults to the one named by the app config.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Watermark database file
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Copy files newer than each scenario's watermark
    Import {
        /// Scenario names, or "all"
        #[arg(required = true)]
        scenarios: Vec<String>,

        #[command(flatten)]
        window: WindowArgs,

        /// Only report what would be copied
        #[arg(short = 'n', long)]
        dry_run: bool,

        /// Give up on a single file after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
    /// Show what a scenario source holds without copying
    Scan {
        scenario: String,

        #[command(flatten)]
        window: WindowArgs,
    },
    /// List scenarios and their watermarks
    Status,
}

#[derive(clap::Args, Debug)]
struct WindowArgs {
    /// Import files newer than this instead of the stored watermark
    #[arg(short, long, value_parser = parse_timestamp)]
    from: Option<DateTime<Utc>>,

    /// Ignore files newer than this
    #[arg(short, long, value_parser = parse_timestamp)]
    to: Option<DateTime<Utc>>,

    /// Mount point the scenario source is relative to
    #[arg(short, long)]
    device: Option<PathBuf>,
}

fn log_init(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn show(t: &DateTime<Utc>) -> String {
    t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

fn run(cli: Cli) -> Result<bool> {
    let paths = resolve_paths(cli.config, cli.state)?;
    log::debug!("user config: {:?}", paths.user_config);
    log::debug!("watermarks: {:?}", paths.data_file);
    let config = GlobalConfig::load(&paths.user_config)?;
    let mut store = SqliteWatermarkStore::open(&paths.data_file)
        .with_context(|| format!("failed to open watermark store {:?}", paths.data_file))?;

    match cli.command {
        Command::Import {
            scenarios,
            window,
            dry_run,
            timeout,
        } => {
            let cancel = CancelToken::new();
            let handler_token = cancel.clone();
            ctrlc::set_handler(move || {
                log::warn!("received Ctrl+C, stopping after the current chunk");
                handler_token.cancel();
            })
            .context("failed to install Ctrl+C handler")?;

            let options = RunOptions {
                from: window.from,
                to: window.to,
                device: window.device,
                dry_run,
                timeout: timeout.map(Duration::from_secs),
                cancel,
            };
            let selection = Selection::from_args(&scenarios);
            let reports = Session::new(&config, &mut store, options).import_selection(&selection)?;
            let mut ok = true;
            for report in &reports {
                ok &= report.is_success();
                match &report.outcome {
                    Ok(result) => {
                        let watermark = result
                            .new_watermark
                            .map(|w| show(&w.newest))
                            .unwrap_or_else(|| "unchanged".to_string());
                        println!(
                            "{}: {}copied {}, skipped {}, filtered {}, failed {}{}, watermark {}",
                            report.name,
                            if result.dry_run { "(dry run) " } else { "" },
                            result.copied,
                            result.skipped,
                            result.filtered,
                            result.failed,
                            if result.cancelled { ", cancelled" } else { "" },
                            watermark
                        );
                        for failure in &result.failures {
                            println!("  {}", failure);
                        }
                        if let Some(e) = &result.save_error {
                            println!("  error: {}", e);
                        }
                    }
                    Err(e) => println!("{}: error: {}", report.name, e),
                }
            }
            // cancelled before every scenario got a turn
            let expected = match &selection {
                Selection::All => config.scenarios.len(),
                Selection::Named(names) => names.len(),
            };
            ok &= reports.len() == expected;
            Ok(ok)
        }
        Command::Scan { scenario, window } => {
            let scenario = config.scenario(&scenario)?;
            let options = RunOptions {
                from: window.from,
                to: window.to,
                device: window.device,
                ..Default::default()
            };
            let session = Session::new(&config, &mut store, options);
            let report = session.survey(scenario)?;
            println!("scenario: {}", scenario.name);
            println!("found extensions:");
            for (ext, count) in &report.found_extensions {
                let ext = if ext.is_empty() { "(none)" } else { ext.as_str() };
                println!("  {}: {}", ext, count);
            }
            let oldest = report.oldest.as_ref().map(show).unwrap_or_else(|| "?".into());
            let newest = report.newest.as_ref().map(show).unwrap_or_else(|| "?".into());
            println!("oldest: {}", oldest);
            println!("newest: {}", newest);
            println!("to import: {}", report.accepted);
            if !report.unexpected_extensions.is_empty() {
                log::warn!(
                    "found unexpected file extensions, these files will be skipped: {:?}",
                    report.unexpected_extensions
                );
            }
            Ok(report.errors == 0)
        }
        Command::Status => {
            let session = Session::new(&config, &mut store, RunOptions::default());
            for (name, watermark) in session.status()? {
                match watermark {
                    Some(w) => println!(
                        "{}: {} .. {} ({})",
                        name,
                        show(&w.oldest),
                        show(&w.newest),
                        format_stored(&w.newest)
                    ),
                    None => println!("{}: never imported", name),
                }
            }
            Ok(true)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    log_init(cli.verbose);
    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            log::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}
