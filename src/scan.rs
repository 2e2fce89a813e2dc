//! Scan options shared by read and write transactions (spec §4.1).

/// The `start` key of a scan. For base scans this is always `Key`. For
/// index scans it may be a bare secondary string, or a `(secondary,
/// primary)` pair -- an absent or empty primary component means "from
/// the beginning of that secondary" (spec §4.1).
#[derive(Debug, Clone)]
pub enum StartKey {
    Key(String),
    Pair(String, Option<String>),
}

#[derive(Debug, Clone)]
pub struct ScanStart {
    pub key: StartKey,
    pub exclusive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub prefix: String,
    pub limit: Option<u32>,
    pub start: Option<ScanStart>,
    pub index_name: Option<String>,
}

impl ScanOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_start(mut self, key: StartKey, exclusive: bool) -> Self {
        self.start = Some(ScanStart { key, exclusive });
        self
    }

    pub fn on_index(mut self, name: impl Into<String>) -> Self {
        self.index_name = Some(name.into());
        self
    }
}

/// One row produced by a base scan.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanItem {
    pub key: String,
    pub value: serde_json::Value,
}

/// One row produced by an index scan.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexScanItem {
    pub secondary: String,
    pub primary: String,
    pub value: serde_json::Value,
}
