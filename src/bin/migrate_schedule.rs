//! Backfills legacy `Course.schedule` text into normalized schedule rows.
//!
//! Run with `--dry-run` first (optionally `--failures-file <path>` to export
//! entries that could not be migrated), then without it to write.
//!
//! Both modes run in a single write transaction, so a dry-run also holds the
//! SQLite write lock until it finishes. API writes against the same file
//! wait on the busy timeout meanwhile; run it outside busy hours.
//!
//! A storage error aborts the run with exit code 1 and nothing is written.

use std::env;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use estudify_schedule::backfill::{BackfillOptions, run_backfill};
use estudify_schedule::db::open_connection;
use estudify_schedule::init_tracing;
use estudify_schedule::settings::Settings;
use tracing::error;

const USAGE: &str = "usage: migrate-schedule [--dry-run] [--failures-file <path>]";

fn parse_args(args: impl Iterator<Item = String>) -> Result<BackfillOptions, String> {
    let mut options = BackfillOptions::default();
    let mut args = args;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--dry-run" => options.dry_run = true,
            "--failures-file" => {
                let path = args
                    .next()
                    .ok_or_else(|| "missing value for --failures-file".to_string())?;
                options.failures_file = Some(PathBuf::from(path));
            }
            other => return Err(format!("unknown argument: {other}")),
        }
    }
    Ok(options)
}

fn main() -> ExitCode {
    let options = match parse_args(env::args().skip(1)) {
        Ok(options) => options,
        Err(msg) => {
            eprintln!("{msg}\n{USAGE}");
            return ExitCode::from(2);
        }
    };

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&settings);

    let mut conn = match open_connection(&settings.database_path) {
        Ok(conn) => conn,
        Err(err) => {
            error!(path = %settings.database_path, error = %err, "cannot open database");
            return ExitCode::FAILURE;
        }
    };

    let report = match run_backfill(&mut conn, &options) {
        Ok(report) => report,
        Err(err) => {
            error!(error = %err, "schedule backfill aborted");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = report.render(&mut io::stdout().lock(), &mut io::stderr().lock()) {
        error!(error = %err, "could not print backfill report");
    }
    ExitCode::SUCCESS
}
