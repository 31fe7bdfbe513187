use std::io;
use std::path::Path;

use serde::Serialize;

use crate::state::{HolderRecord, HolderState};

#[derive(Debug, Serialize)]
struct HolderEntry {
    address: String,
    owner: String,
    amount: String,
    state: HolderState,
}

impl From<&HolderRecord> for HolderEntry {
    fn from(record: &HolderRecord) -> Self {
        Self {
            address: record.address.to_string(),
            owner: record.owner.to_string(),
            amount: record.amount.to_string(),
            state: record.state,
        }
    }
}

pub fn render_holders(records: &[HolderRecord]) -> serde_json::Result<String> {
    let entries: Vec<HolderEntry> = records.iter().map(HolderEntry::from).collect();
    serde_json::to_string_pretty(&entries)
}

/// Overwrites `path` with the latest scan, creating parent directories.
pub async fn write_holders(path: &Path, records: &[HolderRecord]) -> io::Result<()> {
    let rendered = render_holders(records).map_err(io::Error::other)?;
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, rendered).await
}
