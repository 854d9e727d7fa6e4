//! On-disk snapshot of the position registry.
//!
//! A single JSON file so a restart doesn't need a full on-chain rebuild to
//! know what it was tracking. Written with owner-only permissions and
//! swapped in atomically (write to a sibling temp file, then rename) so a
//! crash mid-write never leaves a corrupt cache behind.

use super::CachedPosition;
use crate::core::error::{HarvesterError, HarvesterResult};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

pub struct RegistryCache {
    path: PathBuf,
}

impl RegistryCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> Option<Vec<CachedPosition>> {
        let data = std::fs::read(&self.path).ok()?;
        match serde_json::from_slice(&data) {
            Ok(positions) => Some(positions),
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "cache file is corrupt, ignoring");
                None
            }
        }
    }

    pub fn save(&self, positions: &[CachedPosition]) -> HarvesterResult<()> {
        let body = serde_json::to_vec_pretty(positions)?;
        let tmp_path = sibling_temp_path(&self.path);

        std::fs::write(&tmp_path, &body)?;
        set_owner_only(&tmp_path)?;
        std::fs::rename(&tmp_path, &self.path).map_err(HarvesterError::from)?;

        debug!(count = positions.len(), path = %self.path.display(), "saved registry cache");
        Ok(())
    }
}

fn sibling_temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

#[cfg(unix)]
fn set_owner_only(path: &Path) -> HarvesterResult<()> {
    let mut perms = std::fs::metadata(path)?.permissions();
    perms.set_mode(0o600);
    std::fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_owner_only(_path: &Path) -> HarvesterResult<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Side;
    use solana_sdk::pubkey::Pubkey;

    fn sample() -> CachedPosition {
        CachedPosition {
            id: Pubkey::new_unique(),
            owner: Pubkey::new_unique(),
            pool: Pubkey::new_unique(),
            aux: Pubkey::new_unique(),
            side: Side::Sell,
            min_bin: 0,
            max_bin: 9,
        }
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RegistryCache::new(dir.path().join("positions.json"));
        let positions = vec![sample(), sample()];

        cache.save(&positions).unwrap();
        let loaded = cache.load().unwrap();

        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].id, positions[0].id);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = RegistryCache::new(dir.path().join("missing.json"));
        assert!(cache.load().is_none());
    }

    #[test]
    fn corrupt_file_loads_as_none_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");
        std::fs::write(&path, b"not json").unwrap();
        let cache = RegistryCache::new(path);
        assert!(cache.load().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");
        let cache = RegistryCache::new(&path);
        cache.save(&[sample()]).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
