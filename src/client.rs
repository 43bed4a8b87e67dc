use crate::config::SessionAuth;
use crate::models::{CatalogItem, ImageCandidates, MediaDescriptor, PhotoSetMedia, VideoMedia};
use crate::{EngineError, Result};
use serde_json::Value;
use std::io::Read;
use std::time::Duration;
use url::Url;

const SITE_ORIGIN: &str = "https://www.tiktok.com";
const ITEM_DETAIL_URL: &str = "https://www.tiktok.com/api/item/detail/";
const WEB_APP_ID: &str = "1988";
pub const CHAIN_TOKEN_COOKIE: &str = "tt_chain_token";
const MAX_JSON_BYTES: u64 = 4 * 1024 * 1024;
const MAX_PAGE_BYTES: u64 = 8 * 1024 * 1024;
const SNIFF_BYTES: usize = 512;

/// Public HTML page plus the cookies the response set.
#[derive(Debug, Clone, Default)]
pub struct PageResponse {
    pub body: String,
    pub cookies: Vec<(String, String)>,
}

impl PageResponse {
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// Upstream calls the pipeline depends on.
pub trait MediaClient {
    /// Primary, session-backed item detail lookup. Returns
    /// [`EngineError::Blocked`] when the platform filters the item.
    fn resolve(&self, item: &CatalogItem) -> Result<MediaDescriptor>;

    /// Primary byte fetch for a resolved video.
    fn fetch_bytes(&self, media: &VideoMedia) -> Result<Vec<u8>>;

    /// Public item page, used by the fallback resolver.
    fn fetch_page(&self, url: &str) -> Result<PageResponse>;

    /// Direct authenticated byte fetch, presenting the chain token when known.
    /// Also used for slideshow images.
    fn fetch_direct(&self, url: &str, chain_token: Option<&str>) -> Result<Vec<u8>>;
}

pub fn item_page_url(item: &CatalogItem) -> String {
    format!(
        "{SITE_ORIGIN}/@{}/video/{}",
        item.author.unique_id.trim(),
        item.id.trim()
    )
}

pub struct HttpMediaClient {
    agent: ureq::Agent,
    auth: SessionAuth,
}

impl HttpMediaClient {
    pub fn new(auth: SessionAuth, timeout_secs: u64) -> Self {
        Self {
            agent: build_http_agent(&auth.user_agent, timeout_secs),
            auth,
        }
    }

    fn item_detail_url(item_id: &str) -> Result<String> {
        let mut url = Url::parse(ITEM_DETAIL_URL)
            .map_err(|e| EngineError::Resolution(format!("invalid detail endpoint: {e}")))?;
        url.query_pairs_mut()
            .append_pair("aid", WEB_APP_ID)
            .append_pair("itemId", item_id);
        Ok(url.to_string())
    }

    fn get_media(&self, url: &str, cookie: &str) -> Result<Vec<u8>> {
        let mut response = self
            .agent
            .get(url)
            .header("Accept", "*/*")
            .header("Accept-Encoding", "identity")
            .header("Range", "bytes=0-")
            .header("Referer", &format!("{SITE_ORIGIN}/"))
            .header("Origin", SITE_ORIGIN)
            .header("Cookie", cookie)
            .call()
            .map_err(|err| {
                EngineError::Transfer(format!(
                    "request failed for {}: {err}",
                    redact_url_for_log(url)
                ))
            })?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(EngineError::Transfer(format!(
                "http {status} for {}",
                redact_url_for_log(url)
            )));
        }

        let content_type = header_string(&response, "content-type");
        let mut data = Vec::new();
        response
            .body_mut()
            .as_reader()
            .read_to_end(&mut data)
            .map_err(|err| {
                EngineError::Transfer(format!(
                    "failed reading response body for {}: {err}",
                    redact_url_for_log(url)
                ))
            })?;

        if data.is_empty() {
            return Err(EngineError::Transfer(format!(
                "empty response body for {}",
                redact_url_for_log(url)
            )));
        }
        let sniff = &data[..data.len().min(SNIFF_BYTES)];
        if is_non_media_response(&content_type, sniff) {
            return Err(EngineError::Transfer(format!(
                "URL did not return media ({content_type}) for {}",
                redact_url_for_log(url)
            )));
        }
        Ok(data)
    }
}

impl MediaClient for HttpMediaClient {
    fn resolve(&self, item: &CatalogItem) -> Result<MediaDescriptor> {
        let url = Self::item_detail_url(&item.id)?;
        let mut response = self
            .agent
            .get(&url)
            .header("Accept", "application/json, text/plain, */*")
            .header("Referer", &item_page_url(item))
            .header("Cookie", &self.auth.cookie_header())
            .call()
            .map_err(|err| {
                EngineError::Resolution(format!("item detail request failed: {err}"))
            })?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(EngineError::Resolution(format!(
                "item detail http {status} for item {}",
                item.id
            )));
        }

        let mut body = String::new();
        response
            .body_mut()
            .as_reader()
            .take(MAX_JSON_BYTES)
            .read_to_string(&mut body)?;
        if body.trim().is_empty() {
            return Err(EngineError::Resolution(format!(
                "item detail returned empty body for item {}",
                item.id
            )));
        }
        let value: Value = serde_json::from_str(&body).map_err(|err| {
            EngineError::Resolution(format!(
                "item detail returned invalid json for item {}: {err}",
                item.id
            ))
        })?;
        interpret_item_detail(&item.id, &value)
    }

    fn fetch_bytes(&self, media: &VideoMedia) -> Result<Vec<u8>> {
        let cookie =
            cookie_with_chain_token(self.auth.cookie_header(), media.chain_token.as_deref());
        self.get_media(&media.download_addr, &cookie)
    }

    fn fetch_page(&self, url: &str) -> Result<PageResponse> {
        let mut response = self
            .agent
            .get(url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Cookie", &self.auth.cookie_header())
            .call()
            .map_err(|err| {
                EngineError::Resolution(format!(
                    "page request failed for {}: {err}",
                    redact_url_for_log(url)
                ))
            })?;

        let status = response.status().as_u16();
        if status >= 400 {
            return Err(EngineError::Resolution(format!(
                "page http {status} for {}",
                redact_url_for_log(url)
            )));
        }

        let cookies = response
            .headers()
            .get_all("set-cookie")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(parse_set_cookie)
            .collect();

        let mut html_buf = Vec::new();
        response
            .body_mut()
            .as_reader()
            .take(MAX_PAGE_BYTES)
            .read_to_end(&mut html_buf)?;

        Ok(PageResponse {
            body: String::from_utf8_lossy(&html_buf).into_owned(),
            cookies,
        })
    }

    fn fetch_direct(&self, url: &str, chain_token: Option<&str>) -> Result<Vec<u8>> {
        let cookie = cookie_with_chain_token(self.auth.cookie_header(), chain_token);
        self.get_media(url, &cookie)
    }
}

/// Appends the chain token to a session cookie header when one is known.
fn cookie_with_chain_token(mut cookie: String, chain_token: Option<&str>) -> String {
    if let Some(token) = chain_token.map(str::trim).filter(|t| !t.is_empty()) {
        cookie.push_str(&format!("; {CHAIN_TOKEN_COOKIE}={token}"));
    }
    cookie
}

/// Classifies an item-detail response.
pub fn interpret_item_detail(item_id: &str, value: &Value) -> Result<MediaDescriptor> {
    let status_code = value
        .get("statusCode")
        .or_else(|| value.get("status_code"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if status_code != 0 {
        let msg = value
            .get("statusMsg")
            .or_else(|| value.get("status_msg"))
            .and_then(Value::as_str)
            .unwrap_or("");
        return Err(EngineError::Resolution(format!(
            "item detail for {item_id} returned statusCode {status_code} {msg}"
        )));
    }

    let Some(item_struct) = value.pointer("/itemInfo/itemStruct") else {
        return Err(EngineError::Resolution(format!(
            "item detail for {item_id} is missing itemInfo.itemStruct"
        )));
    };

    if item_struct
        .get("isContentClassified")
        .and_then(Value::as_bool)
        .unwrap_or(false)
    {
        return Err(EngineError::Blocked(format!(
            "item {item_id} is marked as classified content"
        )));
    }

    media_from_item_struct(item_struct).ok_or_else(|| {
        EngineError::Blocked(format!("item {item_id} has no playable media on the primary path"))
    })
}

/// Reads the media section of an `itemStruct`, preferring a slideshow when
/// one is present.
pub fn media_from_item_struct(item: &Value) -> Option<MediaDescriptor> {
    if let Some(images) = item.pointer("/imagePost/images").and_then(Value::as_array) {
        let images: Vec<ImageCandidates> = images
            .iter()
            .map(|image| ImageCandidates {
                url_list: image
                    .pointer("/imageURL/urlList")
                    .and_then(Value::as_array)
                    .map(|urls| {
                        urls.iter()
                            .filter_map(Value::as_str)
                            .map(str::trim)
                            .filter(|u| !u.is_empty())
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .filter(|image| !image.url_list.is_empty())
            .collect();
        if !images.is_empty() {
            return Some(MediaDescriptor::PhotoSet(PhotoSetMedia { images }));
        }
    }

    let video = item.get("video")?;
    let download_addr = video.get("downloadAddr").and_then(Value::as_str).unwrap_or("");
    let play_addr = video.get("playAddr").and_then(Value::as_str).unwrap_or("");
    VideoMedia::normalized(download_addr, play_addr).map(MediaDescriptor::Video)
}

fn build_http_agent(user_agent: &str, timeout_secs: u64) -> ureq::Agent {
    let mut config = ureq::Agent::config_builder();
    config = config
        .http_status_as_error(false)
        .timeout_global(Some(Duration::from_secs(timeout_secs.max(1))))
        .user_agent(user_agent);
    config.build().into()
}

fn header_string(response: &ureq::http::Response<ureq::Body>, key: &str) -> String {
    response
        .headers()
        .get(key)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase()
}

fn parse_set_cookie(raw: &str) -> Option<(String, String)> {
    let first = raw.split(';').next()?.trim();
    let (name, value) = first.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    Some((name.to_string(), value.trim().to_string()))
}

fn is_non_media_response(content_type: &str, sniff_prefix: &[u8]) -> bool {
    let ctype = content_type.trim();
    if !ctype.is_empty() {
        if ctype.starts_with("video/")
            || ctype.starts_with("image/")
            || ctype.starts_with("audio/")
            || ctype.contains("application/octet-stream")
            || ctype.contains("application/mp4")
        {
            return false;
        }
        if ctype.starts_with("text/")
            || ctype.contains("html")
            || ctype.contains("json")
            || ctype.contains("xml")
        {
            return true;
        }
    }
    looks_like_textual_error_payload(sniff_prefix)
}

fn looks_like_textual_error_payload(sniff_prefix: &[u8]) -> bool {
    if sniff_prefix.is_empty() {
        return false;
    }
    let head = String::from_utf8_lossy(sniff_prefix);
    let trimmed = head.trim_start().to_ascii_lowercase();
    trimmed.starts_with("<!doctype html")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<?xml")
        || trimmed.starts_with('{')
}

pub fn redact_url_for_log(value: &str) -> String {
    match Url::parse(value) {
        Ok(uri) => {
            let scheme = uri.scheme();
            let authority = uri.host_str().unwrap_or("unknown-host");
            format!("{scheme}://{authority}/...")
        }
        Err(_) => "[invalid-url]".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn interpret_item_detail_substitutes_play_addr() {
        let value = json!({
            "statusCode": 0,
            "itemInfo": {"itemStruct": {"video": {"downloadAddr": "", "playAddr": "https://v/play"}}}
        });
        let media = interpret_item_detail("1", &value).expect("media");
        assert_eq!(
            media,
            MediaDescriptor::Video(VideoMedia {
                download_addr: "https://v/play".to_string(),
                play_addr: "https://v/play".to_string(),
                chain_token: None,
            })
        );
    }

    #[test]
    fn interpret_item_detail_flags_classified_and_missing_media_as_blocked() {
        let classified = json!({
            "itemInfo": {"itemStruct": {
                "isContentClassified": true,
                "video": {"downloadAddr": "https://v/dl"}
            }}
        });
        assert!(matches!(
            interpret_item_detail("1", &classified),
            Err(EngineError::Blocked(_))
        ));

        let empty = json!({"itemInfo": {"itemStruct": {"video": {}}}});
        assert!(matches!(
            interpret_item_detail("1", &empty),
            Err(EngineError::Blocked(_))
        ));
    }

    #[test]
    fn interpret_item_detail_reports_status_codes_as_resolution_errors() {
        let value = json!({"statusCode": 10204, "statusMsg": "item doesn't exist"});
        let err = interpret_item_detail("9", &value).expect_err("error");
        assert!(matches!(err, EngineError::Resolution(ref m) if m.contains("10204")));
    }

    #[test]
    fn media_from_item_struct_prefers_photo_sets() {
        let value = json!({
            "video": {"playAddr": "https://v/play"},
            "imagePost": {"images": [
                {"imageURL": {"urlList": ["https://img/1a", "https://img/1b"]}},
                {"imageURL": {"urlList": []}},
                {"imageURL": {"urlList": ["https://img/2a"]}}
            ]}
        });
        let Some(MediaDescriptor::PhotoSet(set)) = media_from_item_struct(&value) else {
            panic!("expected photo set");
        };
        assert_eq!(set.images.len(), 2);
        assert_eq!(set.images[0].url_list, vec!["https://img/1a", "https://img/1b"]);
    }

    #[test]
    fn set_cookie_parsing_keeps_name_and_value_only() {
        assert_eq!(
            parse_set_cookie("tt_chain_token=abc123; Path=/; HttpOnly"),
            Some(("tt_chain_token".to_string(), "abc123".to_string()))
        );
        assert_eq!(parse_set_cookie("garbage"), None);

        let page = PageResponse {
            body: String::new(),
            cookies: vec![
                ("tt_chain_token".to_string(), "old".to_string()),
                ("tt_chain_token".to_string(), "new".to_string()),
            ],
        };
        assert_eq!(page.cookie(CHAIN_TOKEN_COOKIE), Some("new"));
    }

    #[test]
    fn chain_token_is_added_to_the_media_cookie_when_known() {
        let base = "sessionid=s; msToken=m".to_string();
        assert_eq!(
            cookie_with_chain_token(base.clone(), Some("tok")),
            "sessionid=s; msToken=m; tt_chain_token=tok"
        );
        assert_eq!(cookie_with_chain_token(base.clone(), Some("  ")), base);
        assert_eq!(cookie_with_chain_token(base.clone(), None), base);
    }

    #[test]
    fn textual_payloads_are_not_media() {
        assert!(is_non_media_response("text/html; charset=utf-8", b"<html>"));
        assert!(is_non_media_response("", b"{\"statusCode\":1}"));
        assert!(!is_non_media_response("video/mp4", b"\x00\x00\x00\x18ftyp"));
        assert!(!is_non_media_response("", b"\x00\x00\x00\x18ftyp"));
    }

    #[test]
    fn item_page_url_uses_author_and_id() {
        let item: CatalogItem = serde_json::from_value(json!({
            "id": "42", "author": {"uniqueId": "someone"}, "createTime": 0
        }))
        .expect("item");
        assert_eq!(item_page_url(&item), "https://www.tiktok.com/@someone/video/42");
        assert_eq!(
            redact_url_for_log("https://v16.cdn.example/video/tos?sig=secret"),
            "https://v16.cdn.example/..."
        );
    }
}
