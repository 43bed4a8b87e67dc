use std::path::PathBuf;

use tokvault_engine::batch::{run_batch, StopRequest};
use tokvault_engine::client::HttpMediaClient;
use tokvault_engine::config::{
    load_download_settings, load_session_context, DEFAULT_SESSION_FILE,
};
use tokvault_engine::paths::ArchivePaths;
use tokvault_engine::pipeline::PipelineContext;
use tokvault_engine::retry::ThreadSleeper;
use tokvault_engine::run_log::RunLog;
use tokvault_engine::{catalog, EngineError, Result};

fn main() -> std::result::Result<(), String> {
    run().map_err(|e| e.to_string())
}

fn run() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "-h" || a == "--help") {
        print_help();
        return Ok(());
    }

    let mut catalog_path: Option<PathBuf> = None;
    let mut favorites_path: Option<PathBuf> = None;
    let mut session_path = PathBuf::from(DEFAULT_SESSION_FILE);
    let mut settings_path: Option<PathBuf> = None;
    let mut out_dir = PathBuf::from(".");

    let mut i = 1;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--catalog" | "--favorites" | "--config" | "--settings" | "--out-dir" => {
                i += 1;
                let v = args.get(i).ok_or_else(|| {
                    EngineError::Configuration(format!("{flag} requires a value"))
                })?;
                let v = PathBuf::from(v);
                match flag {
                    "--catalog" => catalog_path = Some(v),
                    "--favorites" => favorites_path = Some(v),
                    "--config" => session_path = v,
                    "--settings" => settings_path = Some(v),
                    _ => out_dir = v,
                }
            }
            other => {
                return Err(EngineError::Configuration(format!(
                    "unknown arg: {other} (try --help)"
                )));
            }
        }
        i += 1;
    }

    let catalog_path = catalog_path
        .ok_or_else(|| EngineError::Configuration("missing required --catalog".to_string()))?;

    // Everything that can invalidate the whole run is checked before the first item.
    let auth = load_session_context(&session_path)?.validate()?;
    let settings = match settings_path {
        Some(path) => load_download_settings(&path)?,
        None => Default::default(),
    };
    let mut collection_data = catalog::load_catalog(&catalog_path)?;
    if let Some(path) = favorites_path {
        let favorites = catalog::load_favorites(&path)?;
        collection_data = catalog::with_uncategorized(collection_data, &favorites);
    }

    let paths = ArchivePaths::for_user(&out_dir, &auth.unique_id);
    let run_log = RunLog::new(paths.run_log_path());
    paths
        .ensure_dirs()
        .map_err(|e| EngineError::storage(&paths.base_dir, e))?;
    let stop = StopRequest::new(paths.stop_file_path());
    if stop.clear()? {
        println!("Removed a stop request left by an earlier run.");
    }

    println!("Downloading {}'s collections", auth.unique_id);
    println!("Output: {}", paths.base_dir.to_string_lossy());
    println!("Run log: {}", run_log.path().to_string_lossy());
    println!(
        "Create {} to stop after the current item.",
        stop.path().to_string_lossy()
    );

    let client = HttpMediaClient::new(auth, settings.http_timeout_secs);
    let sleeper = ThreadSleeper;
    let ctx = PipelineContext {
        client: &client,
        sleeper: &sleeper,
        paths: &paths,
        settings: &settings,
    };

    let mut current_collection = String::new();
    let summary = run_batch(
        &ctx,
        &collection_data,
        || stop.is_requested(),
        |progress| {
            if progress.collection != current_collection {
                current_collection = progress.collection.to_string();
                println!("\nProcessing collection: {current_collection}");
            }
            println!(
                "[{}/{}] item {}",
                progress.index, progress.total, progress.item_id
            );
        },
        |level, event, data| {
            if level == "error" {
                eprintln!("{event}: {data}");
            }
            let _ = run_log.log_line(level, event, data);
        },
    )?;

    if summary.cancelled {
        stop.clear()?;
    }

    println!();
    println!(
        "Done: {} downloaded, {} skipped, {} failed ({} of {} processed){}",
        summary.downloaded,
        summary.skipped,
        summary.failed,
        summary.processed,
        summary.total,
        if summary.cancelled { ", stopped early" } else { "" }
    );
    if let Some(path) = summary.failure_log_path {
        println!("Failures: {path}");
    }
    Ok(())
}

fn print_help() {
    println!(
        r#"tokvault_download

Downloads every item of a saved-collections catalog (videos and photo sets)
plus per-item metadata.

Usage:
  cargo run --bin tokvault_download -- --catalog collection_data_me.json
  cargo run --bin tokvault_download -- --catalog collections.json --favorites favorites.json

Options:
  --catalog <path>     Catalog JSON: {{"collections": [{{"name", "collectionId", "itemList"}}]}}
  --favorites <path>   Favorites listing; items not in any collection go to "Uncategorized"
  --config <path>      Session file with cookies and app_context (default: tiktok_config.json)
  --settings <path>    Download settings JSON (defaults apply to missing fields)
  --out-dir <path>     Parent folder for <uniqueId>-tiktok-collection (default: .)
"#
    );
}
