//! Local filesystem persistence of windows.

use crate::config::Configuration;
use crate::window::{Window, WindowSink};
use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub struct LocalWriter {
    session_dir: PathBuf,
    save_csv_files: bool,
    storage_limit_bytes: Option<u64>,
    configuration_written: bool,
    configuration: Configuration,
}

impl LocalWriter {
    pub fn new(
        local_output_root: &Path,
        session: &str,
        save_csv_files: bool,
        storage_limit_bytes: Option<u64>,
        configuration: Configuration,
    ) -> Result<Self> {
        let session_dir = local_output_root.join(session);
        fs::create_dir_all(&session_dir)
            .with_context(|| format!("failed to create session directory {session_dir:?}"))?;
        Ok(Self {
            session_dir,
            save_csv_files,
            storage_limit_bytes,
            configuration_written: false,
            configuration,
        })
    }

    fn write_configuration_sidecar(&mut self) -> Result<()> {
        if self.configuration_written {
            return Ok(());
        }
        let path = self.session_dir.join("configuration.json");
        let json = serde_json::to_string_pretty(&self.configuration)?;
        atomic_write(&path, json.as_bytes())?;
        self.configuration_written = true;
        Ok(())
    }

    fn window_path(&self, window_index: u64) -> PathBuf {
        self.session_dir.join(format!("window-{window_index}.json"))
    }

    fn append_csv_rows(&self, window: &Window) -> Result<()> {
        for per_node in window.sensor_data.values() {
            for (sensor_name, samples) in per_node {
                if samples.is_empty() {
                    continue;
                }
                let path = self.session_dir.join(format!("{sensor_name}.csv"));
                let mut rows = String::new();
                for sample in samples {
                    let row: Vec<String> = sample.iter().map(|v| v.to_string()).collect();
                    rows.push_str(&row.join(","));
                    rows.push('\n');
                }
                let mut file = fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&path)
                    .with_context(|| format!("failed to open {path:?} for append"))?;
                use std::io::Write;
                file.write_all(rows.as_bytes())?;
            }
        }
        Ok(())
    }

    /// Delete the lowest-indexed `window-*.json` files until the session directory is back
    /// under the configured storage cap.
    fn enforce_storage_cap(&self) -> Result<()> {
        let Some(limit) = self.storage_limit_bytes else {
            return Ok(());
        };

        loop {
            let mut windows = list_window_files(&self.session_dir)?;
            let total: u64 = windows.iter().map(|(_, _, size)| size).sum();
            if total <= limit || windows.is_empty() {
                return Ok(());
            }
            windows.sort_by_key(|(index, _, _)| *index);
            let (_, path, _) = &windows[0];
            fs::remove_file(path).with_context(|| format!("failed to delete {path:?}"))?;
        }
    }
}

fn list_window_files(session_dir: &Path) -> Result<Vec<(u64, PathBuf, u64)>> {
    let mut out = Vec::new();
    for entry in fs::read_dir(session_dir).context("failed to list session directory")? {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(index) = parse_window_index(name) else {
            continue;
        };
        let size = entry.metadata()?.len();
        out.push((index, path, size));
    }
    Ok(out)
}

fn parse_window_index(name: &str) -> Option<u64> {
    let rest = name.strip_prefix("window-")?;
    let digits = rest.strip_suffix(".json")?;
    digits.parse().ok()
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data).with_context(|| format!("failed to write {tmp:?}"))?;
    fs::rename(&tmp, path).with_context(|| format!("failed to rename {tmp:?} -> {path:?}"))?;
    Ok(())
}

impl WindowSink for LocalWriter {
    fn handle_window(&mut self, window: Window) -> Result<()> {
        self.write_configuration_sidecar()?;

        let path = self.window_path(window.window_index);
        let json = serde_json::to_string_pretty(&window)?;
        atomic_write(&path, json.as_bytes())?;

        if self.save_csv_files {
            self.append_csv_rows(&window)?;
        }

        self.enforce_storage_cap()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn sample_window(index: u64) -> Window {
        let mut sensor_data = HashMap::new();
        let mut per_sensor = HashMap::new();
        per_sensor.insert("Baros_P".to_string(), vec![vec![0.0, 1.0]]);
        sensor_data.insert("0".to_string(), per_sensor);
        Window {
            window_index: index,
            sensor_time_offset: 0.0,
            sensor_data,
        }
    }

    #[test]
    fn writes_window_json_and_configuration_sidecar() {
        let dir = TempDir::new().unwrap();
        let mut writer = LocalWriter::new(dir.path(), "session-a", false, None, Configuration::default()).unwrap();
        writer.handle_window(sample_window(0)).unwrap();

        assert!(dir.path().join("session-a").join("window-0.json").exists());
        assert!(dir.path().join("session-a").join("configuration.json").exists());
    }

    #[test]
    fn storage_cap_deletes_oldest_window_first() {
        let dir = TempDir::new().unwrap();
        let mut writer =
            LocalWriter::new(dir.path(), "session-b", false, Some(1), Configuration::default()).unwrap();
        writer.handle_window(sample_window(0)).unwrap();
        writer.handle_window(sample_window(1)).unwrap();
        writer.handle_window(sample_window(2)).unwrap();

        let session_dir = dir.path().join("session-b");
        assert!(!session_dir.join("window-0.json").exists());
        assert!(session_dir.join("window-2.json").exists());
    }

    #[test]
    fn csv_rows_are_appended_per_sensor() {
        let dir = TempDir::new().unwrap();
        let mut writer = LocalWriter::new(dir.path(), "session-c", true, None, Configuration::default()).unwrap();
        writer.handle_window(sample_window(0)).unwrap();

        let csv = fs::read_to_string(dir.path().join("session-c").join("Baros_P.csv")).unwrap();
        assert_eq!(csv, "0,1\n");
    }
}
