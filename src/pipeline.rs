//! Per-item state machine: resolve, dedup check, download, metadata.
//!
//! `Fetching → Resolved → {DuplicateSkip | Downloading} → MetadataWritten → Done`,
//! with any stage able to end in `Failed`. Failures never escape
//! [`process_item`]; they come back as [`ItemOutcome::Failed`] carrying the
//! record the batch driver merges into its failure log.

use crate::client::{redact_url_for_log, MediaClient};
use crate::config::DownloadSettings;
use crate::models::{
    CatalogItem, FailureRecord, ItemMetadata, MediaDescriptor, PhotoSetMedia, VideoMedia,
};
use crate::paths::{ArchivePaths, DestinationPaths};
use crate::retry::{with_retries, Sleeper};
use crate::{dedup, fallback, EngineError, Result};
use serde_json::{json, Value};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

pub type LogFn<'a> = dyn FnMut(&str, &str, Value) + 'a;

/// Shared, read-only collaborators for a run.
pub struct PipelineContext<'a> {
    pub client: &'a dyn MediaClient,
    pub sleeper: &'a dyn Sleeper,
    pub paths: &'a ArchivePaths,
    pub settings: &'a DownloadSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemStage {
    Fetching,
    Resolved,
    DuplicateSkip,
    Downloading,
    MetadataWritten,
    Done,
}

impl ItemStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStage::Fetching => "fetching",
            ItemStage::Resolved => "resolved",
            ItemStage::DuplicateSkip => "duplicate_skip",
            ItemStage::Downloading => "downloading",
            ItemStage::MetadataWritten => "metadata_written",
            ItemStage::Done => "done",
        }
    }
}

#[derive(Debug)]
pub enum ItemOutcome {
    Downloaded(DestinationPaths),
    /// Prior output already satisfies the item; nothing was written.
    Skipped(DestinationPaths),
    Failed(FailureRecord),
}

enum Completion {
    Downloaded,
    Skipped,
}

pub fn process_item(
    ctx: &PipelineContext<'_>,
    collection_name: &str,
    item: &CatalogItem,
    log: &mut LogFn<'_>,
) -> ItemOutcome {
    let dest = DestinationPaths::for_item(ctx.paths, collection_name, item, ctx.settings);
    let mut stage = ItemStage::Fetching;
    let mut media: Option<MediaDescriptor> = None;

    match run_stages(ctx, item, &dest, &mut stage, &mut media, log) {
        Ok(Completion::Skipped) => ItemOutcome::Skipped(dest),
        Ok(Completion::Downloaded) => ItemOutcome::Downloaded(dest),
        Err(err) => {
            log(
                "error",
                "item_failed",
                json!({
                    "item_id": item.id,
                    "collection": collection_name,
                    "stage": stage.as_str(),
                    "error": err.to_string(),
                }),
            );
            ItemOutcome::Failed(FailureRecord {
                collection: collection_name.to_string(),
                error: err.detail(),
                metadata: item.clone(),
                video: media,
            })
        }
    }
}

fn run_stages(
    ctx: &PipelineContext<'_>,
    item: &CatalogItem,
    dest: &DestinationPaths,
    stage: &mut ItemStage,
    media_out: &mut Option<MediaDescriptor>,
    log: &mut LogFn<'_>,
) -> Result<Completion> {
    let media = resolve_media(ctx, item, log)?;
    *media_out = Some(media.clone());
    *stage = ItemStage::Resolved;

    match &media {
        MediaDescriptor::Video(video) => {
            if dedup::is_video_complete(&dest.video_path, ctx.settings.min_complete_video_bytes) {
                *stage = ItemStage::DuplicateSkip;
                log_skip(log, item, &dest.video_path);
                return Ok(Completion::Skipped);
            }
            *stage = ItemStage::Downloading;
            download_video(ctx, item, video, dest, log)?;
        }
        MediaDescriptor::PhotoSet(set) => {
            if dedup::is_photo_set_complete(&dest.photo_dir, set.images.len()) {
                *stage = ItemStage::DuplicateSkip;
                log_skip(log, item, &dest.photo_dir);
                return Ok(Completion::Skipped);
            }
            *stage = ItemStage::Downloading;
            download_photo_set(ctx, item, set, dest, log)?;
        }
    }

    write_metadata(&dest.metadata_path, item)?;
    *stage = ItemStage::MetadataWritten;

    log(
        "info",
        "item_downloaded",
        json!({
            "item_id": item.id,
            "kind": media_kind(&media),
            "metadata_path": dest.metadata_path.to_string_lossy(),
        }),
    );
    *stage = ItemStage::Done;
    Ok(Completion::Downloaded)
}

/// Primary lookup with retries; a blocked item goes to the page fallback.
fn resolve_media(
    ctx: &PipelineContext<'_>,
    item: &CatalogItem,
    log: &mut LogFn<'_>,
) -> Result<MediaDescriptor> {
    let policy = ctx.settings.retry_policy();
    let primary = with_retries(
        policy,
        ctx.sleeper,
        |_| ctx.client.resolve(item),
        |attempt, err, delay| log_retry(log, "resolve", item, attempt, err, delay),
    );

    let media = match primary {
        Err(EngineError::Blocked(reason)) => {
            log(
                "info",
                "primary_blocked",
                json!({"item_id": item.id, "reason": reason}),
            );
            with_retries(
                policy,
                ctx.sleeper,
                |_| fallback::resolve_via_page(ctx.client, item),
                |attempt, err, delay| log_retry(log, "fallback_resolve", item, attempt, err, delay),
            )?
        }
        other => other?,
    };

    log(
        "info",
        "item_resolved",
        json!({"item_id": item.id, "kind": media_kind(&media)}),
    );
    Ok(media)
}

fn download_video(
    ctx: &PipelineContext<'_>,
    item: &CatalogItem,
    video: &VideoMedia,
    dest: &DestinationPaths,
    log: &mut LogFn<'_>,
) -> Result<()> {
    let policy = ctx.settings.retry_policy();
    let primary = with_retries(
        policy,
        ctx.sleeper,
        |_| ctx.client.fetch_bytes(video),
        |attempt, err, delay| log_retry(log, "fetch_bytes", item, attempt, err, delay),
    );

    let bytes = match primary {
        Ok(bytes) => bytes,
        Err(primary_err) => {
            log(
                "warn",
                "primary_transfer_failed",
                json!({"item_id": item.id, "error": primary_err.to_string()}),
            );
            let source = match with_retries(
                policy,
                ctx.sleeper,
                |_| fallback::resolve_via_page(ctx.client, item),
                |attempt, err, delay| log_retry(log, "fallback_resolve", item, attempt, err, delay),
            ) {
                Ok(MediaDescriptor::Video(refreshed)) => refreshed,
                Ok(MediaDescriptor::PhotoSet(_)) => video.clone(),
                Err(err) => {
                    log(
                        "warn",
                        "fallback_resolution_failed",
                        json!({"item_id": item.id, "error": err.to_string()}),
                    );
                    video.clone()
                }
            };
            with_retries(
                policy,
                ctx.sleeper,
                |_| {
                    ctx.client
                        .fetch_direct(&source.download_addr, source.chain_token.as_deref())
                },
                |attempt, err, delay| log_retry(log, "fetch_direct", item, attempt, err, delay),
            )?
        }
    };

    write_file_atomic(&dest.video_path, &bytes)?;
    log(
        "info",
        "video_saved",
        json!({
            "item_id": item.id,
            "bytes": bytes.len(),
            "path": dest.video_path.to_string_lossy(),
        }),
    );
    Ok(())
}

fn download_photo_set(
    ctx: &PipelineContext<'_>,
    item: &CatalogItem,
    set: &PhotoSetMedia,
    dest: &DestinationPaths,
    log: &mut LogFn<'_>,
) -> Result<()> {
    std::fs::create_dir_all(&dest.photo_dir)
        .map_err(|e| EngineError::storage(&dest.photo_dir, e))?;

    let mut missing: Vec<usize> = Vec::new();
    for (index, image) in set.images.iter().enumerate() {
        let target = dest.photo_path(index);
        let mut saved = false;
        for url in &image.url_list {
            match ctx.client.fetch_direct(url, None) {
                Ok(bytes) => {
                    write_file_atomic(&target, &bytes)?;
                    saved = true;
                    ctx.sleeper.sleep(ctx.settings.image_delay());
                    break;
                }
                Err(err) => log(
                    "debug",
                    "image_candidate_failed",
                    json!({
                        "item_id": item.id,
                        "image": index + 1,
                        "url": redact_url_for_log(url),
                        "error": err.to_string(),
                    }),
                ),
            }
        }
        if !saved {
            missing.push(index + 1);
        }
    }

    if !missing.is_empty() {
        return Err(EngineError::Transfer(format!(
            "{} of {} images could not be downloaded (images {:?})",
            missing.len(),
            set.images.len(),
            missing
        )));
    }
    Ok(())
}

/// Writes the fixed metadata projection, replacing any previous file.
pub fn write_metadata(path: &Path, item: &CatalogItem) -> Result<()> {
    let json = serde_json::to_string_pretty(&ItemMetadata::from(item))?;
    write_file_atomic(path, format!("{json}\n").as_bytes())
}

/// Writes through a `.part` sibling so an interrupted write never leaves a
/// truncated file under the final name.
pub fn write_file_atomic(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| EngineError::storage(parent, e))?;
    }
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "download".to_string());
    let temp_path = path.with_file_name(format!("{file_name}.part"));

    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&temp_path)?;
        file.write_all(data)?;
        file.flush()?;
        drop(file);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        std::fs::rename(&temp_path, path)
    };

    write().map_err(|e| {
        let _ = std::fs::remove_file(&temp_path);
        EngineError::storage(path, e)
    })
}

fn media_kind(media: &MediaDescriptor) -> &'static str {
    match media {
        MediaDescriptor::Video(_) => "video",
        MediaDescriptor::PhotoSet(_) => "photo_set",
    }
}

fn log_skip(log: &mut LogFn<'_>, item: &CatalogItem, path: &Path) {
    log(
        "info",
        "item_skipped_duplicate",
        json!({"item_id": item.id, "path": path.to_string_lossy()}),
    );
}

fn log_retry(
    log: &mut LogFn<'_>,
    operation: &str,
    item: &CatalogItem,
    attempt: u32,
    err: &EngineError,
    delay: Duration,
) {
    log(
        "warn",
        "retry_scheduled",
        json!({
            "operation": operation,
            "item_id": item.id,
            "attempt": attempt + 1,
            "delay_ms": delay.as_millis() as u64,
            "error": err.to_string(),
        }),
    );
}
