use crate::models::{Catalog, CatalogItem, Collection};
use crate::{EngineError, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

pub const UNCATEGORIZED_COLLECTION: &str = "Uncategorized";

pub fn load_catalog(path: &Path) -> Result<Catalog> {
    let bytes = std::fs::read(path).map_err(|e| {
        EngineError::Configuration(format!(
            "failed to read catalog at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Configuration(format!(
            "failed to parse catalog at {}: {e}",
            path.to_string_lossy()
        ))
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FavoritesFile {
    Items(Vec<CatalogItem>),
    Listing {
        #[serde(rename = "itemList", default)]
        item_list: Vec<CatalogItem>,
    },
}

/// Reads a favorites listing, either a bare item array or `{"itemList": [...]}`.
pub fn load_favorites(path: &Path) -> Result<Vec<CatalogItem>> {
    let bytes = std::fs::read(path).map_err(|e| {
        EngineError::Configuration(format!(
            "failed to read favorites at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    let parsed: FavoritesFile = serde_json::from_slice(&bytes).map_err(|e| {
        EngineError::Configuration(format!(
            "failed to parse favorites at {}: {e}",
            path.to_string_lossy()
        ))
    })?;
    Ok(match parsed {
        FavoritesFile::Items(items) => items,
        FavoritesFile::Listing { item_list } => item_list,
    })
}

/// Favorites that are not in any collection, as a synthetic collection.
/// Returns `None` when every favorite is already collected.
pub fn uncategorized_collection(catalog: &Catalog, favorites: &[CatalogItem]) -> Option<Collection> {
    let collected: HashSet<&str> = catalog
        .collections
        .iter()
        .flat_map(|c| c.item_list.iter().map(|i| i.id.as_str()))
        .collect();

    let mut seen: HashSet<&str> = HashSet::new();
    let item_list: Vec<CatalogItem> = favorites
        .iter()
        .filter(|item| !collected.contains(item.id.as_str()))
        .filter(|item| seen.insert(item.id.as_str()))
        .cloned()
        .collect();

    if item_list.is_empty() {
        return None;
    }
    Some(Collection {
        name: UNCATEGORIZED_COLLECTION.to_string(),
        collection_id: String::new(),
        item_list,
    })
}

/// Appends the uncategorized favorites to the catalog, if any.
pub fn with_uncategorized(mut catalog: Catalog, favorites: &[CatalogItem]) -> Catalog {
    if let Some(extra) = uncategorized_collection(&catalog, favorites) {
        catalog.collections.push(extra);
    }
    catalog
}
