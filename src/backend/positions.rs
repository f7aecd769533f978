use log::warn;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

/// Last-read chapter index per manga title.
pub trait PositionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<i64>;
    fn set(&self, key: &str, value: i64);
}

/// Positions kept in a small JSON object on disk, rewritten on every change.
pub struct JsonPositionStore {
    path: PathBuf,
    positions: Mutex<HashMap<String, i64>>,
}

impl JsonPositionStore {
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();

        let positions = if path.exists() {
            fs::read_to_string(&path)
                .ok()
                .and_then(|content| serde_json::from_str(&content).ok())
                .unwrap_or_else(|| {
                    warn!("Ignoring unreadable positions file {}", path.display());
                    HashMap::new()
                })
        } else {
            HashMap::new()
        };

        Self {
            path,
            positions: Mutex::new(positions),
        }
    }

    fn save(&self, positions: &HashMap<String, i64>) {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).ok();
        }

        let result = serde_json::to_string_pretty(positions)
            .map_err(std::io::Error::other)
            .and_then(|content| fs::write(&self.path, content));
        if let Err(e) = result {
            warn!("Failed to save positions to {}: {}", self.path.display(), e);
        }
    }
}

impl PositionStore for JsonPositionStore {
    fn get(&self, key: &str) -> Option<i64> {
        self.positions.lock().get(key).copied()
    }

    fn set(&self, key: &str, value: i64) {
        let mut positions = self.positions.lock();
        if positions.get(key) == Some(&value) {
            return;
        }
        positions.insert(key.to_string(), value);
        self.save(&positions);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("positions.json");

        let store = JsonPositionStore::load(&path);
        assert_eq!(store.get("Some Title"), None);
        store.set("Some Title", 3);
        store.set("Other", 0);

        let reloaded = JsonPositionStore::load(&path);
        assert_eq!(reloaded.get("Some Title"), Some(3));
        assert_eq!(reloaded.get("Other"), Some(0));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("positions.json");
        fs::write(&path, "{ not json").unwrap();

        let store = JsonPositionStore::load(&path);
        assert_eq!(store.get("anything"), None);

        store.set("anything", 2);
        assert_eq!(JsonPositionStore::load(&path).get("anything"), Some(2));
    }
}
