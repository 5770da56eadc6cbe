use crate::model::Event;
use crate::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    Generated,
    MessageId,
}

impl SortKey {
    pub fn as_str(self) -> &'static str {
        match self {
            SortKey::Generated => "generated",
            SortKey::MessageId => "message_id",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDir {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub key: SortKey,
    pub dir: SortDir,
}

impl SortSpec {
    pub const fn new(key: SortKey, dir: SortDir) -> Self {
        Self { key, dir }
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dir = match self.dir {
            SortDir::Asc => "asc",
            SortDir::Desc => "desc",
        };
        write!(f, "{}:{}", self.key.as_str(), dir)
    }
}

/// Sort used when the caller requests none.
pub const DEFAULT_SORT: [SortSpec; 2] = [
    SortSpec::new(SortKey::Generated, SortDir::Asc),
    SortSpec::new(SortKey::MessageId, SortDir::Asc),
];

/// Keyset pagination over events.
///
/// `marker` is the `message_id` of the last event of the previous page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    pub limit: Option<usize>,
    pub marker: Option<String>,
    #[serde(default)]
    pub sort: Vec<SortSpec>,
}

impl Pagination {
    pub fn limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Parse `key[:dir]` sort strings. `message_id` is appended as tie-break
    /// when absent.
    pub fn from_params<S: AsRef<str>>(
        limit: Option<usize>,
        marker: Option<String>,
        sort: &[S],
    ) -> StorageResult<Self> {
        let mut specs = Vec::with_capacity(sort.len() + 1);
        for raw in sort {
            let raw = raw.as_ref();
            let (key, dir) = raw.split_once(':').unwrap_or((raw, ""));
            let key = match key {
                "generated" => SortKey::Generated,
                "message_id" => SortKey::MessageId,
                other => {
                    return Err(StorageError::InvalidQuery(format!(
                        "sort key `{other}` is not supported, use one of: generated, message_id"
                    )))
                }
            };
            let dir = match dir {
                "" | "asc" => SortDir::Asc,
                "desc" => SortDir::Desc,
                other => {
                    return Err(StorageError::InvalidQuery(format!(
                        "sort direction `{other}` is not supported, use asc or desc"
                    )))
                }
            };
            specs.push(SortSpec::new(key, dir));
        }
        if !specs.is_empty() && !specs.iter().any(|s| s.key == SortKey::MessageId) {
            specs.push(SortSpec::new(SortKey::MessageId, SortDir::Asc));
        }
        Ok(Self {
            limit,
            marker,
            sort: specs,
        })
    }

    pub fn sort_or_default(&self) -> &[SortSpec] {
        if self.sort.is_empty() {
            &DEFAULT_SORT
        } else {
            &self.sort
        }
    }

    /// A zero limit is answered without touching storage.
    pub fn is_empty_page(&self) -> bool {
        self.limit == Some(0)
    }
}

/// Order two events under `sort`.
pub fn compare_events(a: &Event, b: &Event, sort: &[SortSpec]) -> Ordering {
    for spec in sort {
        let ord = match spec.key {
            SortKey::Generated => a.generated.cmp(&b.generated),
            SortKey::MessageId => a.message_id.cmp(&b.message_id),
        };
        let ord = match spec.dir {
            SortDir::Asc => ord,
            SortDir::Desc => ord.reverse(),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    Ordering::Equal
}

/// Sort, skip past `marker` and truncate an already-filtered event set.
pub fn paginate_in_memory(
    mut events: Vec<Event>,
    marker: Option<&Event>,
    pagination: &Pagination,
) -> Vec<Event> {
    let sort = pagination.sort_or_default();
    events.sort_by(|a, b| compare_events(a, b, sort));
    if let Some(marker) = marker {
        events.retain(|e| compare_events(e, marker, sort) == Ordering::Greater);
    }
    if let Some(limit) = pagination.limit {
        events.truncate(limit);
    }
    events
}

pub(crate) fn marker_not_found(marker: &str) -> StorageError {
    StorageError::InvalidMarker(format!("marker {marker} not found"))
}
