//! Re-derives an item's media from its public page when the primary API path
//! refuses to serve it.
//!
//! The page embeds the item in one of two JSON blobs depending on which
//! front-end build served it. Each format has its own extractor; they are
//! tried in order and the first one that finds the item wins.

use crate::client::{item_page_url, media_from_item_struct, MediaClient, CHAIN_TOKEN_COOKIE};
use crate::models::{CatalogItem, MediaDescriptor};
use crate::{EngineError, Result};
use scraper::{Html, Selector};
use serde_json::Value;

const SIGI_STATE_SCRIPT: &str = "script#SIGI_STATE";
const REHYDRATION_SCRIPT: &str = "script#__UNIVERSAL_DATA_FOR_REHYDRATION__";
const REHYDRATION_SCOPE: &str = "__DEFAULT_SCOPE__";
const VIDEO_DETAIL_KEY: &str = "webapp.video-detail";

/// Item data found in a page blob.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddedItem {
    /// Non-zero when the page loaded but the platform refused this item.
    pub status_code: i64,
    pub status_msg: Option<String>,
    pub item_struct: Option<Value>,
}

pub struct Extractor {
    pub name: &'static str,
    pub extract: fn(&Html, &str) -> Option<EmbeddedItem>,
}

pub const EXTRACTORS: &[Extractor] = &[
    Extractor {
        name: "sigi_state",
        extract: extract_sigi_state,
    },
    Extractor {
        name: "universal_rehydration",
        extract: extract_universal_rehydration,
    },
];

/// Fetches the item's public page and resolves it from the embedded data,
/// attaching the chain token cookie the page response set.
pub fn resolve_via_page(client: &dyn MediaClient, item: &CatalogItem) -> Result<MediaDescriptor> {
    let page = client.fetch_page(&item_page_url(item))?;
    let mut media = resolve_from_html(&page.body, &item.id)?;
    if let MediaDescriptor::Video(video) = &mut media {
        video.chain_token = page.cookie(CHAIN_TOKEN_COOKIE).map(str::to_string);
    }
    Ok(media)
}

pub fn resolve_from_html(html: &str, item_id: &str) -> Result<MediaDescriptor> {
    let document = Html::parse_document(html);
    for extractor in EXTRACTORS {
        let Some(found) = (extractor.extract)(&document, item_id) else {
            continue;
        };
        if found.status_code != 0 {
            return Err(EngineError::Resolution(format!(
                "platform refused item {item_id} (statusCode {}{})",
                found.status_code,
                found
                    .status_msg
                    .as_deref()
                    .filter(|m| !m.is_empty())
                    .map(|m| format!(": {m}"))
                    .unwrap_or_default()
            )));
        }
        let item_struct = found.item_struct.ok_or_else(|| {
            EngineError::Resolution(format!(
                "{} data for item {item_id} has no itemStruct",
                extractor.name
            ))
        })?;
        return media_from_item_struct(&item_struct).ok_or_else(|| {
            EngineError::Resolution(format!(
                "{} data for item {item_id} has no playable media",
                extractor.name
            ))
        });
    }
    Err(EngineError::Resolution(format!(
        "no embedded item data found in page for item {item_id}"
    )))
}

fn script_json(document: &Html, selector: &str) -> Option<Value> {
    let selector = Selector::parse(selector).ok()?;
    let script = document.select(&selector).next()?;
    let text: String = script.text().collect();
    serde_json::from_str(text.trim()).ok()
}

/// Legacy state blob: `ItemModule[<id>]` holds the item struct directly.
pub fn extract_sigi_state(document: &Html, item_id: &str) -> Option<EmbeddedItem> {
    let state = script_json(document, SIGI_STATE_SCRIPT)?;
    let item = state.get("ItemModule")?.get(item_id)?;
    Some(EmbeddedItem {
        status_code: 0,
        status_msg: None,
        item_struct: Some(item.clone()),
    })
}

/// Rehydration blob: `__DEFAULT_SCOPE__["webapp.video-detail"]` carries a
/// status code and `itemInfo.itemStruct`.
pub fn extract_universal_rehydration(document: &Html, _item_id: &str) -> Option<EmbeddedItem> {
    let data = script_json(document, REHYDRATION_SCRIPT)?;
    let detail = data.get(REHYDRATION_SCOPE)?.get(VIDEO_DETAIL_KEY)?;
    Some(EmbeddedItem {
        status_code: detail.get("statusCode").and_then(Value::as_i64).unwrap_or(0),
        status_msg: detail
            .get("statusMsg")
            .and_then(Value::as_str)
            .map(str::to_string),
        item_struct: detail.pointer("/itemInfo/itemStruct").cloned(),
    })
}
