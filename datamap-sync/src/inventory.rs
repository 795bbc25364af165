//! Remote tile inventory.

use std::collections::BTreeMap;

use crate::error::StoreError;
use crate::store::ObjectStore;

/// Size and content hash of one remote tile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub size: u64,
    /// Unquoted hex digest.
    pub etag: String,
}

/// Remote tiles by path relative to the bucket prefix.
pub type Inventory = BTreeMap<String, RemoteObject>;

/// List every `.png` object under `prefix`, following continuation tokens
/// until the listing is exhausted.
pub fn fetch_inventory(store: &dyn ObjectStore, prefix: &str) -> Result<Inventory, StoreError> {
    let mut inventory = Inventory::new();
    let mut continuation: Option<String> = None;
    loop {
        let page = store.list_page(prefix, continuation.as_deref())?;
        for object in page.objects {
            if !object.key.ends_with(".png") {
                continue;
            }
            let Some(relative) = object.key.strip_prefix(prefix) else {
                continue;
            };
            inventory.insert(
                relative.to_string(),
                RemoteObject {
                    size: object.size,
                    etag: object.etag.trim_matches('"').to_string(),
                },
            );
        }
        match page.next {
            Some(token) => continuation = Some(token),
            None => break,
        }
    }
    tracing::debug!(
        bucket = store.bucket(),
        prefix,
        tiles = inventory.len(),
        "fetched remote inventory"
    );
    Ok(inventory)
}
