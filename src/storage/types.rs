//! Object descriptors returned by the store

use serde::{Deserialize, Serialize};

/// Immutable descriptor of a source object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectInfo {
    pub bucket: String,
    pub key: String,
    pub size: u64,
}

impl ObjectInfo {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, size: u64) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            size,
        }
    }
}

/// One page of a listing
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectInfo>,
    /// Token to pass back for the next page, `None` on the last page
    pub next_token: Option<String>,
}

/// Select the page of `sorted` (key, size) pairs that follows `continuation`.
///
/// Shared by the memory and file backends, which both page over an ordered
/// key space using the last returned key as the continuation token.
pub(crate) fn page_after(
    bucket: &str,
    sorted: impl IntoIterator<Item = (String, u64)>,
    continuation: Option<&str>,
    page_size: usize,
) -> ListPage {
    let mut objects = Vec::with_capacity(page_size);
    let mut has_more = false;
    for (key, size) in sorted {
        if continuation.is_some_and(|token| key.as_str() <= token) {
            continue;
        }
        if objects.len() == page_size {
            has_more = true;
            break;
        }
        objects.push(ObjectInfo::new(bucket, key, size));
    }
    let next_token = if has_more {
        objects.last().map(|o| o.key.clone())
    } else {
        None
    };
    ListPage {
        objects,
        next_token,
    }
}
