//! Demo CLI harness.
//!
//! A thin runnable surface over the transaction engine, not the tool
//! dispatch or protocol layer a real host application would expose
//! (those are out of scope for this crate). This binary exists so the
//! engine can be exercised by hand against a real vault directory.

use clap::Parser;
use lifeos_rename_engine::config::{AppSettings, VaultConfig};
use lifeos_rename_engine::recovery::recover_pending_transactions;
use lifeos_rename_engine::transaction::{RenameRequest, TransactionManager};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

/// Atomically rename a note and rewrite every wikilink reference to it.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Vault root directory. Defaults to the last vault used, if any.
    #[arg(long)]
    vault: Option<PathBuf>,

    /// Note to rename, relative to the vault root or absolute.
    old_path: PathBuf,

    /// New path for the note, relative to the vault root or absolute.
    new_path: PathBuf,

    /// Skip rewriting wikilink references elsewhere in the vault.
    #[arg(long)]
    no_update_links: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    debug: bool,
}

fn resolve_path(vault_root: &std::path::Path, path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        path
    } else {
        vault_root.join(path)
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    setup_tracing(&args);

    let mut settings = AppSettings::load();
    let vault_root = match args.vault.clone().or_else(|| settings.last_vault.clone()) {
        Some(v) => v,
        None => {
            eprintln!("no vault specified; pass --vault <path> the first time");
            return ExitCode::FAILURE;
        }
    };
    settings.last_vault = Some(vault_root.clone());
    let _ = settings.save();

    let config = VaultConfig::resolve(vault_root.clone());
    let manager = TransactionManager::new(config);
    recover_pending_transactions(&manager);

    let request = RenameRequest {
        old_path: resolve_path(&vault_root, args.old_path),
        new_path: resolve_path(&vault_root, args.new_path),
        update_links: !args.no_update_links,
        dry_run: false,
    };

    match manager.execute(request) {
        Ok(success) => {
            println!("{}", success.message);
            println!("correlation id: {}", success.correlation_id);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("[{}] {e}", e.error_code());
            if let Some(hint) = e.recovery_hint() {
                eprintln!("hint: {hint}");
            }
            ExitCode::FAILURE
        }
    }
}

/// Sets up the tracing subscriber for logging.
fn setup_tracing(args: &Args) {
    let log_level = if args.debug { "debug" } else { "info" };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("lifeos_rename_engine={}", log_level).into());

    let formatter = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::LocalTime::rfc_3339())
        .with_span_events(FmtSpan::CLOSE);

    // Use a more human-readable format for debug builds
    if cfg!(debug_assertions) {
        formatter.pretty().init();
    } else {
        formatter.init();
    }
}
