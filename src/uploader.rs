//! Remote uploader with backup-and-retry on failure.

use crate::config::Configuration;
use crate::object_store::ObjectStore;
use crate::window::{Window, WindowSink};
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

pub struct Uploader {
    store: Box<dyn ObjectStore>,
    cloud_output_root: String,
    session: String,
    backup_dir: PathBuf,
    metadata: Option<HashMap<String, String>>,
    configuration_uploaded: bool,
    configuration: Configuration,
}

impl Uploader {
    pub fn new(
        store: Box<dyn ObjectStore>,
        cloud_output_root: &str,
        session: &str,
        local_output_root: &Path,
        configuration: Configuration,
    ) -> Result<Self> {
        let backup_dir = local_output_root.join(session).join(".backup");
        fs::create_dir_all(&backup_dir)
            .with_context(|| format!("failed to create backup directory {backup_dir:?}"))?;
        Ok(Self {
            store,
            cloud_output_root: cloud_output_root.to_string(),
            session: session.to_string(),
            backup_dir,
            metadata: None,
            configuration_uploaded: false,
            configuration,
        })
    }

    fn object_path(&self, window_index: u64) -> String {
        format!(
            "{}/{}/window-{}.json",
            self.cloud_output_root, self.session, window_index
        )
    }

    fn configuration_object_path(&self) -> String {
        format!("{}/{}/configuration.json", self.cloud_output_root, self.session)
    }

    fn upload_configuration(&mut self) -> Result<()> {
        if self.configuration_uploaded {
            return Ok(());
        }
        let json = serde_json::to_vec(&self.configuration)?;
        let metadata = self.configuration_metadata();
        self.store
            .upload(&self.configuration_object_path(), &json, Some(&metadata))?;
        self.configuration_uploaded = true;
        Ok(())
    }

    fn configuration_metadata(&mut self) -> HashMap<String, String> {
        if self.metadata.is_none() {
            let mut metadata = HashMap::new();
            if let Ok(config_json) = serde_json::to_string(&self.configuration) {
                metadata.insert("data_gateway__configuration".to_string(), config_json);
            }
            self.metadata = Some(metadata);
        }
        self.metadata.clone().unwrap_or_default()
    }

    fn backup_path(&self, window_index: u64) -> PathBuf {
        self.backup_dir.join(format!("window-{window_index}.json"))
    }

    fn write_backup(&self, window: &Window) -> Result<()> {
        let record = BackupRecord {
            window: window.clone(),
            dropped_at: chrono::Utc::now().to_rfc3339(),
        };
        let json = serde_json::to_vec_pretty(&record)?;
        let path = self.backup_path(window.window_index);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &json).with_context(|| format!("failed to write backup {tmp:?}"))?;
        fs::rename(&tmp, &path).with_context(|| format!("failed to rename {tmp:?} -> {path:?}"))?;
        Ok(())
    }

    /// Attempt to upload every pending backup file, in ascending window index order, deleting
    /// each on success and leaving it on failure. Bounded to one attempt per file per call.
    fn retry_backups(&mut self) -> Result<()> {
        let mut backups = list_backup_files(&self.backup_dir)?;
        backups.sort_by_key(|(index, _)| *index);

        for (window_index, path) in backups {
            let record: BackupRecord = match fs::read_to_string(&path) {
                Ok(raw) => match serde_json::from_str(&raw) {
                    Ok(record) => record,
                    Err(err) => {
                        tracing::warn!(error=%err, path=?path, "failed to parse backup file");
                        continue;
                    }
                },
                Err(err) => {
                    tracing::warn!(error=%err, path=?path, "failed to read backup file");
                    continue;
                }
            };
            let bytes = serde_json::to_vec_pretty(&record.window)?;
            let metadata = self.configuration_metadata();
            match self.store.upload(&self.object_path(window_index), &bytes, Some(&metadata)) {
                Ok(()) => {
                    if let Err(err) = fs::remove_file(&path) {
                        tracing::warn!(error=%err, path=?path, "failed to delete uploaded backup file");
                    }
                }
                Err(err) => {
                    tracing::warn!(
                        error = %err,
                        window_index,
                        dropped_at = %record.dropped_at,
                        "retry of backed-up window upload failed"
                    );
                }
            }
        }
        Ok(())
    }
}

/// A window that failed to upload, persisted locally with the time it was dropped.
#[derive(serde::Serialize, serde::Deserialize)]
struct BackupRecord {
    window: Window,
    dropped_at: String,
}

fn list_backup_files(backup_dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(backup_dir).context("failed to list backup directory")? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(rest) = name.strip_prefix("window-") else {
            continue;
        };
        let Some(digits) = rest.strip_suffix(".json") else {
            continue;
        };
        let Ok(index) = digits.parse() else {
            continue;
        };
        out.push((index, path));
    }
    Ok(out)
}

impl WindowSink for Uploader {
    fn handle_window(&mut self, window: Window) -> Result<()> {
        if let Err(err) = self.upload_configuration() {
            tracing::warn!(error=%err, "failed to upload configuration sidecar");
        }

        // Retry any pending backups before attempting the new window.
        self.retry_backups()?;

        let json = serde_json::to_vec_pretty(&window)?;
        let metadata = self.configuration_metadata();

        match self
            .store
            .upload(&self.object_path(window.window_index), &json, Some(&metadata))
        {
            Ok(()) => Ok(()),
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    window_index = window.window_index,
                    "upload failed; writing local backup"
                );
                self.write_backup(&window)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::InMemoryObjectStore;
    use std::collections::HashMap as Map;
    use tempfile::TempDir;

    fn sample_window(index: u64) -> Window {
        let mut sensor_data = Map::new();
        let mut per_sensor = Map::new();
        per_sensor.insert("Baros_P".to_string(), vec![vec![0.0, 1.0]]);
        sensor_data.insert("0".to_string(), per_sensor);
        Window {
            window_index: index,
            sensor_time_offset: 0.0,
            sensor_data,
        }
    }

    #[test]
    fn failed_upload_writes_backup_then_retries_on_next_window() {
        let dir = TempDir::new().unwrap();
        let store = InMemoryObjectStore::new();
        let mut uploader = Uploader::new(
            Box::new(store.clone()),
            "cloud-root",
            "session-a",
            dir.path(),
            Configuration::default(),
        )
        .unwrap();

        store.fail_next("cloud-root/session-a/window-0.json");
        uploader.handle_window(sample_window(0)).unwrap();

        let backup_path = dir.path().join("session-a").join(".backup").join("window-0.json");
        assert!(backup_path.exists());
        assert!(!store.contains("cloud-root/session-a/window-0.json"));

        uploader.handle_window(sample_window(1)).unwrap();

        assert!(!backup_path.exists());
        assert!(store.contains("cloud-root/session-a/window-0.json"));
        assert!(store.contains("cloud-root/session-a/window-1.json"));
    }

    #[test]
    fn idempotent_reupload_replaces_same_object_path() {
        let dir = TempDir::new().unwrap();
        let store = InMemoryObjectStore::new();
        let mut uploader = Uploader::new(
            Box::new(store.clone()),
            "cloud-root",
            "session-b",
            dir.path(),
            Configuration::default(),
        )
        .unwrap();

        uploader.handle_window(sample_window(0)).unwrap();
        let first = store.get("cloud-root/session-b/window-0.json").unwrap();

        let mut second = sample_window(0);
        second.sensor_data.get_mut("0").unwrap().get_mut("Baros_P").unwrap()[0] = vec![0.0, 99.0];
        uploader.handle_window(second).unwrap();
        let replaced = store.get("cloud-root/session-b/window-0.json").unwrap();

        assert_ne!(first, replaced);
    }
}
