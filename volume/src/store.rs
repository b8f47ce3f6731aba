use nix::sys::statvfs::statvfs;
use std::path::Path;

use common::schemas::StorageInfo;

/// Filesystem capacity and usage for the volume holding `root`.
pub fn disk_usage(root: &Path) -> anyhow::Result<StorageInfo> {
    let v = statvfs(root)?;
    let total = v.blocks() as u64 * v.fragment_size() as u64;
    let free = v.blocks_available() as u64 * v.fragment_size() as u64;
    Ok(StorageInfo {
        total,
        used: total.saturating_sub(free),
    })
}
