use crate::config::DownloadSettings;
use crate::models::CatalogItem;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

const COLLECTIONS_SUBDIR: &str = "Collections";
const LOGS_SUBDIR: &str = "logs";
const FAILURE_LOG_FILE: &str = "download_failures.json";
const RUN_LOG_FILE: &str = "run.jsonl";
const STOP_FILE: &str = "STOP";
const UNTITLED: &str = "untitled";
const DATE_FORMAT: &str = "%m-%d-%Y";

#[derive(Debug, Clone)]
pub struct ArchivePaths {
    pub base_dir: PathBuf,
}

impl ArchivePaths {
    pub fn new(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// `<parent>/<uniqueId>-tiktok-collection`
    pub fn for_user(parent: &Path, unique_id: &str) -> Self {
        let owner = sanitize_filename_component(unique_id, 64);
        let owner = if owner.is_empty() { UNTITLED } else { &owner };
        Self::new(parent.join(format!("{owner}-tiktok-collection")))
    }

    pub fn collections_dir(&self) -> PathBuf {
        self.base_dir.join(COLLECTIONS_SUBDIR)
    }

    pub fn collection_dir(&self, collection_name: &str) -> PathBuf {
        let name = sanitize_filename_component(collection_name, 100);
        let name = if name.is_empty() { UNTITLED } else { &name };
        self.collections_dir().join(name)
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.base_dir.join(LOGS_SUBDIR)
    }

    pub fn failure_log_path(&self) -> PathBuf {
        self.logs_dir().join(FAILURE_LOG_FILE)
    }

    pub fn run_log_path(&self) -> PathBuf {
        self.logs_dir().join(RUN_LOG_FILE)
    }

    /// Creating this file asks a running batch to stop after the current item.
    pub fn stop_file_path(&self) -> PathBuf {
        self.logs_dir().join(STOP_FILE)
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.collections_dir())?;
        std::fs::create_dir_all(self.logs_dir())?;
        Ok(())
    }
}

/// Where one item's media and metadata land.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationPaths {
    pub video_path: PathBuf,
    pub photo_dir: PathBuf,
    pub metadata_path: PathBuf,
}

impl DestinationPaths {
    pub fn for_item(
        paths: &ArchivePaths,
        collection_name: &str,
        item: &CatalogItem,
        settings: &DownloadSettings,
    ) -> Self {
        let dir = paths.collection_dir(collection_name);
        let base = item_file_stem(item, settings);
        Self {
            video_path: dir.join(format!("{base}.mp4")),
            photo_dir: dir.join(&base),
            metadata_path: dir.join(format!("{base}.json")),
        }
    }

    pub fn photo_path(&self, index: usize) -> PathBuf {
        self.photo_dir.join(format!("image-{}.jpg", index + 1))
    }
}

/// `<author> - <desc> - <MM-DD-YYYY>`
pub fn item_file_stem(item: &CatalogItem, settings: &DownloadSettings) -> String {
    let author = sanitize_filename_component(&item.author.unique_id, 64);
    let author = if author.is_empty() { UNTITLED } else { &author };
    let desc = truncate_description(&item.desc, settings.description_word_limit);
    // The date segment follows, so the ` ...` marker may end the description.
    let desc = sanitize_filename_text(&desc, settings.max_filename_chars);
    let date = format_create_date(item.create_time, settings.local_dates);
    if desc.is_empty() {
        format!("{author} - {date}")
    } else {
        format!("{author} - {desc} - {date}")
    }
}

/// Keeps the first `max_words` words, rewriting `@` and `:`, and marks the
/// cut with ` ...`.
pub fn truncate_description(desc: &str, max_words: usize) -> String {
    let words: Vec<String> = desc
        .split_whitespace()
        .map(|w| w.replace('@', "(a)").replace(':', " - "))
        .collect();
    let mut out = words
        .iter()
        .take(max_words)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ");
    if words.len() > max_words {
        out.push_str(" ...");
    }
    out
}

/// Creation date as `MM-DD-YYYY`, in UTC or the host timezone.
pub fn format_create_date(epoch_secs: i64, local: bool) -> String {
    let Some(utc) = chrono::DateTime::from_timestamp(epoch_secs, 0) else {
        return "00-00-0000".to_string();
    };
    if local {
        utc.with_timezone(&chrono::Local).format(DATE_FORMAT).to_string()
    } else {
        utc.format(DATE_FORMAT).to_string()
    }
}

fn invalid_chars_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1F\x7F]"#).expect("invalid chars regex"))
}

fn whitespace_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").expect("whitespace regex"))
}

/// Strips characters that are invalid in file names on common filesystems and
/// bounds the result to `max_chars` characters.
pub fn sanitize_filename_component(input: &str, max_chars: usize) -> String {
    let mut limited = sanitize_filename_text(input, max_chars);
    // Windows rejects names ending in a dot or a space.
    while limited.ends_with('.') || limited.ends_with(' ') {
        limited.pop();
    }
    limited
}

/// Like [`sanitize_filename_component`] but keeps trailing dots, for text
/// that sits in the middle of a file name.
pub fn sanitize_filename_text(input: &str, max_chars: usize) -> String {
    let stripped = invalid_chars_re().replace_all(input, "");
    let collapsed = whitespace_re().replace_all(&stripped, " ");
    let limited: String = collapsed.trim().chars().take(max_chars).collect();
    limited.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn item(desc: &str) -> CatalogItem {
        serde_json::from_value(json!({
            "id": "123",
            "author": {"uniqueId": "creator"},
            "desc": desc,
            "createTime": 1_700_000_000,
        }))
        .expect("item")
    }

    #[test]
    fn truncate_description_limits_words_and_rewrites_markers() {
        let twelve = "Hello World this is a very long description with many extra words";
        assert_eq!(truncate_description(twelve, 12), twelve);
        assert_eq!(
            truncate_description(&format!("{twelve} today"), 12),
            "Hello World this is a very long description with many extra words ..."
        );

        assert_eq!(truncate_description("ping @me at 10:30", 12), "ping (a)me at 10 - 30");
        assert_eq!(truncate_description("short", 12), "short");
    }

    #[test]
    fn sanitize_strips_invalid_characters_and_bounds_length() {
        assert_eq!(
            sanitize_filename_component("a/b\\c:d*e?f\"g<h>i|j", 100),
            "abcdefghij"
        );
        assert_eq!(sanitize_filename_component("tabs\tand\nlines", 100), "tabs and lines");
        assert_eq!(sanitize_filename_component("trailing dots...", 100), "trailing dots");
        assert_eq!(sanitize_filename_component("héllo wörld", 5), "héllo");
    }

    #[test]
    fn destination_paths_are_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let paths = ArchivePaths::for_user(dir.path(), "me");
        let settings = DownloadSettings::default();
        let it = item("Check this out #fyp");

        let a = DestinationPaths::for_item(&paths, "Cooking", &it, &settings);
        let b = DestinationPaths::for_item(&paths, "Cooking", &it, &settings);
        assert_eq!(a, b);

        let expected_dir = dir
            .path()
            .join("me-tiktok-collection")
            .join("Collections")
            .join("Cooking");
        assert_eq!(
            a.video_path,
            expected_dir.join("creator - Check this out #fyp - 11-14-2023.mp4")
        );
        assert_eq!(
            a.metadata_path,
            expected_dir.join("creator - Check this out #fyp - 11-14-2023.json")
        );
        assert_eq!(
            a.photo_path(0),
            expected_dir
                .join("creator - Check this out #fyp - 11-14-2023")
                .join("image-1.jpg")
        );
    }

    #[test]
    fn truncated_description_keeps_its_marker_in_the_stem() {
        let it = item("Hello World this is a very long description with many extra words today");
        assert_eq!(
            item_file_stem(&it, &DownloadSettings::default()),
            "creator - Hello World this is a very long description with many extra words ... - 11-14-2023"
        );
        assert_eq!(sanitize_filename_text("ends with ...", 100), "ends with ...");
        assert_eq!(sanitize_filename_component("ends with ...", 100), "ends with");
    }

    #[test]
    fn create_date_can_follow_the_host_timezone() {
        assert_eq!(format_create_date(1_700_000_000, false), "11-14-2023");
        let local = chrono::DateTime::from_timestamp(1_700_000_000, 0)
            .expect("timestamp")
            .with_timezone(&chrono::Local)
            .format("%m-%d-%Y")
            .to_string();
        assert_eq!(format_create_date(1_700_000_000, true), local);
    }

    #[test]
    fn empty_description_omits_middle_segment() {
        let it = item("   ");
        assert_eq!(
            item_file_stem(&it, &DownloadSettings::default()),
            "creator - 11-14-2023"
        );
    }
}
