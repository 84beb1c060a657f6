//! Snapshot naming and daily capture statistics.
//!
//! Snapshots land under `<root>/<YYYYMMDD>/<HHMMSS>_<label>.jpg`. Counts
//! per camera label are recovered by scanning today's directory at
//! startup, so a kiosk restart does not lose the day's tally.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use teecam_core::Camera;

pub struct SnapshotStore {
    root: PathBuf,
    day: String,
    counts: HashMap<String, u32>,
}

impl SnapshotStore {
    pub fn new(root: PathBuf) -> Self {
        let day = Self::today();
        let counts = Self::scan_day(&root, &day);
        let total: u32 = counts.values().sum();
        if total > 0 {
            info!("recovered {} snapshot(s) for {} across {} camera(s)", total, day, counts.len());
        }
        Self { root, day, counts }
    }

    fn today() -> String {
        chrono::Local::now().format("%Y%m%d").to_string()
    }

    fn timestamp() -> String {
        chrono::Local::now().format("%H%M%S").to_string()
    }

    /// Path for the next snapshot of `camera`.
    pub fn next_path(&self, camera: &Camera) -> PathBuf {
        self.root
            .join(Self::today())
            .join(format!("{}_{}.jpg", Self::timestamp(), camera.short_label()))
    }

    /// Bump today's tally for `camera` after a successful capture.
    pub fn record_capture(&mut self, camera: &Camera) {
        self.roll_day();
        *self.counts.entry(camera.short_label()).or_insert(0) += 1;
    }

    pub fn count_today(&mut self, camera: &Camera) -> u32 {
        self.roll_day();
        self.counts.get(&camera.short_label()).copied().unwrap_or(0)
    }

    /// Re-scan when the date rolls over midnight.
    fn roll_day(&mut self) {
        let today = Self::today();
        if today != self.day {
            debug!("date rolled {} -> {}", self.day, today);
            self.day = today;
            self.counts = Self::scan_day(&self.root, &self.day);
        }
    }

    /// Count `HHMMSS_<label>.jpg` files in one day directory.
    fn scan_day(root: &Path, day: &str) -> HashMap<String, u32> {
        let mut counts = HashMap::new();
        let dir = root.join(day);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(_) => return counts, // no captures yet today
        };
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            let Some(stem) = name.strip_suffix(".jpg") else { continue };
            match stem.split_once('_') {
                Some((_, label)) if !label.is_empty() => {
                    *counts.entry(label.to_string()).or_insert(0) += 1;
                }
                _ => warn!("unrecognised snapshot name: {}", name),
            }
        }
        counts
    }
}

// MARK: - Tests

#[cfg(test)]
mod tests {
    use super::*;

    fn camera() -> Camera {
        Camera::new("Hole1_White", "172.16.1.228", 1001).with_label("1W")
    }

    #[test]
    fn next_path_uses_dated_directory_and_label() {
        let dir = tempfile::tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().to_path_buf());

        let path = store.next_path(&camera());
        let day = chrono::Local::now().format("%Y%m%d").to_string();
        assert_eq!(path.parent().unwrap(), dir.path().join(&day));
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.ends_with("_1W.jpg"), "got {name}");
    }

    #[test]
    fn startup_scan_recovers_daily_counts() {
        let dir = tempfile::tempdir().unwrap();
        let day = chrono::Local::now().format("%Y%m%d").to_string();
        let day_dir = dir.path().join(&day);
        std::fs::create_dir_all(&day_dir).unwrap();
        for name in ["120000_1W.jpg", "120105_1W.jpg", "130000_2L.jpg", "notes.txt"] {
            std::fs::write(day_dir.join(name), b"x").unwrap();
        }

        let mut store = SnapshotStore::new(dir.path().to_path_buf());
        assert_eq!(store.count_today(&camera()), 2);

        let other = Camera::new("Hole2_Lady", "172.16.1.226", 1003).with_label("2L");
        assert_eq!(store.count_today(&other), 1);
    }

    #[test]
    fn record_capture_increments_the_tally() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SnapshotStore::new(dir.path().to_path_buf());
        assert_eq!(store.count_today(&camera()), 0);
        store.record_capture(&camera());
        store.record_capture(&camera());
        assert_eq!(store.count_today(&camera()), 2);
    }
}
