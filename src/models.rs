pub const UNKNOWN: &str = "Unknown";

/// One persisted catalog row. `duplicate`, `play_minutes` and `in_list`
/// belong to other subsystems and are carried through updates verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct StationRecord {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub genre: String,
    pub content_type: String,
    pub bitrate: u32,
    pub online: bool,
    pub icon: String,
    pub homepage: String,
    pub error: String,
    pub duplicate: bool,
    pub play_minutes: i64,
    pub in_list: i64,
}

impl StationRecord {
    pub fn new(url: &str) -> StationRecord {
        StationRecord {
            id: 0,
            name: UNKNOWN.to_string(),
            url: url.to_string(),
            genre: UNKNOWN.to_string(),
            content_type: String::new(),
            bitrate: 0,
            online: false,
            icon: UNKNOWN.to_string(),
            homepage: UNKNOWN.to_string(),
            error: String::new(),
            duplicate: false,
            play_minutes: 0,
            in_list: 0,
        }
    }
}

/// Outcome of a single header-only probe. Not persisted.
#[derive(Debug, Clone, Default)]
pub struct ProbeResult {
    pub ok: bool,
    pub url: String,
    pub name: String,
    pub description: String,
    pub homepage_hint: String,
    pub is_live: bool,
    pub genre: String,
    pub content_type: String,
    pub bitrate: u32,
    pub error: String,
}

impl ProbeResult {
    pub fn failed(url: &str, error: String) -> ProbeResult {
        ProbeResult {
            url: url.to_string(),
            error,
            ..ProbeResult::default()
        }
    }
}

/// One entry of the external XML directory feed.
#[derive(Debug, Clone, PartialEq)]
pub struct DirectoryEntry {
    pub server_name: String,
    pub server_type: String,
    pub bitrate: u32,
    pub listen_url: String,
    pub genre: String,
}

#[derive(Debug, Clone, Copy)]
pub struct DbStats {
    pub total: u32,
    pub online: u32,
}

#[derive(Debug, Default)]
pub struct RefreshSummary {
    pub pages: u32,
    pub probed: u32,
    pub updated: u32,
    pub failed: u32,
}

#[derive(Debug, Default)]
pub struct DiscoverySummary {
    pub entries: u32,
    pub existing: u32,
    pub added: u32,
    pub rejected: u32,
    pub failed: u32,
    pub elapsed: std::time::Duration,
}
