//! Tray push target backed by a JSON file.
//!
//! The daemon has no GUI; tray renderers read `tray.json`, which is replaced
//! atomically on every push so readers never see a partial write. The file
//! also carries the most recent timer broadcast.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;

use serde::{Deserialize, Serialize};
use tally_core::{TimerState, TraySink, TraySnapshot};
use tempfile::NamedTempFile;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrayFile {
    #[serde(flatten)]
    pub snapshot: TraySnapshot,
    #[serde(default)]
    pub timer: Option<TimerState>,
}

pub struct FileTraySink {
    path: PathBuf,
    timer_updates: Option<Receiver<TimerState>>,
    timer: Option<TimerState>,
}

impl FileTraySink {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            timer_updates: None,
            timer: None,
        }
    }

    pub fn with_timer(mut self, updates: Receiver<TimerState>) -> Self {
        self.timer_updates = Some(updates);
        self
    }

    fn latest_timer(&mut self) -> Option<TimerState> {
        if let Some(updates) = &self.timer_updates {
            if let Some(state) = updates.try_iter().last() {
                self.timer = Some(state);
            }
        }
        self.timer.clone()
    }
}

impl TraySink for FileTraySink {
    fn update_tray_menu(&mut self, snapshot: &TraySnapshot) -> Result<(), String> {
        let file = TrayFile {
            snapshot: snapshot.clone(),
            timer: self.latest_timer(),
        };
        let content = serde_json::to_string_pretty(&file)
            .map_err(|err| format!("Failed to serialize tray snapshot: {}", err))?;
        atomic_write(&self.path, &content)
    }
}

fn atomic_write(path: &Path, contents: &str) -> Result<(), String> {
    let parent_dir = path
        .parent()
        .ok_or_else(|| "Tray file path has no parent directory".to_string())?;
    fs_err::create_dir_all(parent_dir)
        .map_err(|err| format!("Failed to create tray directory: {}", err))?;

    let mut temp_file =
        NamedTempFile::new_in(parent_dir).map_err(|e| format!("Temp file error: {}", e))?;
    temp_file
        .write_all(contents.as_bytes())
        .map_err(|e| format!("Failed to write temp tray file: {}", e))?;
    temp_file
        .flush()
        .map_err(|e| format!("Failed to flush temp tray file: {}", e))?;
    temp_file
        .persist(path)
        .map_err(|e| format!("Failed to write tray file: {}", e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::mpsc;
    use tally_core::{TimerPhase, TrayMenu};

    fn empty_snapshot() -> TraySnapshot {
        TraySnapshot {
            projects: Vec::new(),
            running: Vec::new(),
            menu: TrayMenu::default(),
            generated_at: Utc::now(),
        }
    }

    fn read_back(path: &Path) -> TrayFile {
        let raw = std::fs::read_to_string(path).expect("read back");
        serde_json::from_str(&raw).expect("parse")
    }

    #[test]
    fn writes_snapshot_as_json() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("nested").join("tray.json");
        let mut sink = FileTraySink::new(path.clone());

        let snapshot = empty_snapshot();
        sink.update_tray_menu(&snapshot).expect("write");

        let file = read_back(&path);
        assert_eq!(file.snapshot, snapshot);
        assert_eq!(file.timer, None);
    }

    #[test]
    fn keeps_latest_timer_between_pushes() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("tray.json");
        let (tx, rx) = mpsc::channel();
        let mut sink = FileTraySink::new(path.clone()).with_timer(rx);

        let mut state = TimerState::initial(25);
        state.project_id = Some("P1".to_string());
        tx.send(TimerState::initial(25)).expect("send");
        tx.send(state.clone()).expect("send");
        sink.update_tray_menu(&empty_snapshot()).expect("write");
        assert_eq!(read_back(&path).timer, Some(state.clone()));

        sink.update_tray_menu(&empty_snapshot()).expect("write again");
        let timer = read_back(&path).timer.expect("timer kept");
        assert_eq!(timer.phase, TimerPhase::Idle);
        assert_eq!(timer.project_id.as_deref(), Some("P1"));
    }
}
