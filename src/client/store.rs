//! On-disk persistence of the client's ranges

use crate::client::state::ClientState;
use crate::error::ScanError;
use log::debug;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Persists a [`ClientState`] as JSON at a fixed path.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store at `<data dir>/subnetwatch/ranges.json`.
    pub fn new() -> crate::Result<Self> {
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .ok_or_else(|| ScanError::Persistence("no data or home directory found".to_string()))?;
        Ok(Self::at(base.join("subnetwatch").join("ranges.json")))
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `path` when given, otherwise the default location.
    pub fn open(path: Option<&Path>) -> crate::Result<Self> {
        match path {
            Some(path) => Ok(Self::at(path)),
            None => Self::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the saved state. A missing file is an empty state.
    pub fn load(&self) -> crate::Result<ClientState> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No saved state at {}", self.path.display());
                return Ok(ClientState::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut state: ClientState = serde_json::from_str(&content).map_err(|e| {
            ScanError::Persistence(format!("{} is not a valid state file: {}", self.path.display(), e))
        })?;
        state.normalize();
        Ok(state)
    }

    /// Save the state, replacing the previous file atomically.
    pub fn save(&self, state: &ClientState) -> crate::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(state)?;
        let tmp_path = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;
        debug!("Saved {} range(s) to {}", state.ranges().len(), self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::RangePrefix;

    #[test]
    fn test_missing_file_is_empty_state() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path().join("nested").join("ranges.json"));
        assert!(store.load().unwrap().ranges().is_empty());
    }

    #[test]
    fn test_save_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::at(dir.path().join("a").join("b").join("ranges.json"));
        let mut state = ClientState::new();
        state.add_range(RangePrefix::new(10, 1, 2)).unwrap();
        store.save(&state).unwrap();
        assert!(store.path().exists());
        assert!(!store.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_file_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ranges.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(StateStore::at(path).load(), Err(ScanError::Persistence(_))));
    }
}
