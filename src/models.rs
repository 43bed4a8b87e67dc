use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// One saved item as listed by the upstream catalog.
///
/// Only `id`, `author.uniqueId`, `desc` and `createTime` are interpreted; the
/// remaining fields are carried through untouched into metadata and failure
/// files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    #[serde(deserialize_with = "item_id")]
    pub id: String,
    pub author: CatalogAuthor,
    #[serde(default)]
    pub desc: String,
    #[serde(deserialize_with = "epoch_seconds")]
    pub create_time: i64,
    #[serde(default)]
    pub music: Value,
    #[serde(default)]
    pub stats: Value,
    #[serde(default = "empty_array")]
    pub contents: Value,
    #[serde(default)]
    pub video: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogAuthor {
    #[serde(rename = "uniqueId")]
    pub unique_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Collection {
    pub name: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub collection_id: String,
    #[serde(default)]
    pub item_list: Vec<CatalogItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default)]
    pub collections: Vec<Collection>,
}

impl Catalog {
    pub fn total_items(&self) -> usize {
        self.collections.iter().map(|c| c.item_list.len()).sum()
    }
}

/// Playable media resolved for one item. Serialized into failure entries as
/// the partially resolved `video` field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MediaDescriptor {
    Video(VideoMedia),
    PhotoSet(PhotoSetMedia),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMedia {
    pub download_addr: String,
    #[serde(default)]
    pub play_addr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_token: Option<String>,
}

impl VideoMedia {
    /// Builds a video descriptor, substituting `play_addr` when the download
    /// address is empty. Returns `None` when both are empty.
    pub fn normalized(download_addr: &str, play_addr: &str) -> Option<Self> {
        let download_addr = download_addr.trim();
        let play_addr = play_addr.trim();
        let effective = if download_addr.is_empty() {
            play_addr
        } else {
            download_addr
        };
        if effective.is_empty() {
            return None;
        }
        Some(Self {
            download_addr: effective.to_string(),
            play_addr: play_addr.to_string(),
            chain_token: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhotoSetMedia {
    pub images: Vec<ImageCandidates>,
}

/// Candidate URLs for one slideshow image, best first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageCandidates {
    pub url_list: Vec<String>,
}

/// Fixed projection of a catalog item written next to the downloaded media.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemMetadata<'a> {
    pub author: &'a CatalogAuthor,
    pub contents: &'a Value,
    pub create_time: i64,
    pub desc: &'a str,
    pub id: &'a str,
    pub music: &'a Value,
    pub stats: &'a Value,
    pub video: &'a Value,
}

impl<'a> From<&'a CatalogItem> for ItemMetadata<'a> {
    fn from(item: &'a CatalogItem) -> Self {
        Self {
            author: &item.author,
            contents: &item.contents,
            create_time: item.create_time,
            desc: &item.desc,
            id: &item.id,
            music: &item.music,
            stats: &item.stats,
            video: &item.video,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub collection: String,
    pub error: String,
    pub metadata: CatalogItem,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<MediaDescriptor>,
}

fn empty_array() -> Value {
    Value::Array(Vec::new())
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// Item ids key the failure log and page URLs, so an absent id is an error.
fn item_id<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let id = string_or_number(deserializer)?;
    if id.trim().is_empty() {
        return Err(serde::de::Error::custom("item id must not be null or empty"));
    }
    Ok(id)
}

fn epoch_seconds<'de, D>(deserializer: D) -> std::result::Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| serde::de::Error::custom("createTime out of range")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid createTime {s:?}: {e}"))),
        other => Err(serde::de::Error::custom(format!(
            "expected epoch seconds, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn catalog_item_accepts_numeric_ids_and_string_create_time() {
        let raw = json!({
            "id": 7301,
            "author": {"uniqueId": "someone", "nickname": "Some One"},
            "desc": "hi",
            "createTime": "1700000000",
        });
        let item: CatalogItem = serde_json::from_value(raw).expect("parse");
        assert_eq!(item.id, "7301");
        assert_eq!(item.create_time, 1_700_000_000);
        assert_eq!(item.contents, json!([]));
        assert_eq!(
            item.author.extra.get("nickname"),
            Some(&json!("Some One"))
        );
    }

    #[test]
    fn catalog_item_rejects_null_or_blank_ids() {
        for id in [json!(null), json!(""), json!("  ")] {
            let raw = json!({"id": id, "author": {"uniqueId": "a"}, "createTime": 0});
            let err = serde_json::from_value::<CatalogItem>(raw).expect_err("blank id");
            assert!(err.to_string().contains("item id"), "err={err}");
        }
        let missing = json!({"author": {"uniqueId": "a"}, "createTime": 0});
        assert!(serde_json::from_value::<CatalogItem>(missing).is_err());
    }

    #[test]
    fn video_media_falls_back_to_play_addr() {
        let media = VideoMedia::normalized("  ", "https://cdn.example/play").expect("media");
        assert_eq!(media.download_addr, "https://cdn.example/play");
        assert!(VideoMedia::normalized("", "").is_none());
    }

    #[test]
    fn media_descriptor_serializes_without_tag() {
        let video = MediaDescriptor::Video(VideoMedia {
            download_addr: "https://a".to_string(),
            play_addr: "https://b".to_string(),
            chain_token: None,
        });
        let value = serde_json::to_value(&video).expect("json");
        assert_eq!(value, json!({"downloadAddr": "https://a", "playAddr": "https://b"}));

        let photos: MediaDescriptor =
            serde_json::from_value(json!({"images": [{"urlList": ["https://x"]}]})).expect("parse");
        assert!(matches!(photos, MediaDescriptor::PhotoSet(ref p) if p.images.len() == 1));
    }
}
