use std::path::Path;

const IMAGE_EXTS: &[&str] = &["jpg", "jpeg", "png", "webp", "heic", "avif", "gif"];

/// A prior video counts as complete when it is larger than `min_bytes`.
/// Interrupted downloads are expected to leave implausibly small files.
pub fn is_video_complete(path: &Path, min_bytes: u64) -> bool {
    match std::fs::metadata(path) {
        Ok(meta) => meta.is_file() && meta.len() > min_bytes,
        Err(_) => false,
    }
}

/// A prior slideshow counts as complete when its folder holds at least
/// `expected` image files.
pub fn is_photo_set_complete(dir: &Path, expected: usize) -> bool {
    if !dir.is_dir() {
        return false;
    }
    count_image_files(dir) >= expected
}

fn count_image_files(dir: &Path) -> usize {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return 0;
    };
    entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|e| IMAGE_EXTS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false)
        })
        .count()
}
