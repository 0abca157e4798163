//! Durable kernel state: the JSON state file and the daemon pid file.
//!
//! Saves are atomic (write-temp-then-rename). Loads are best-effort: a
//! missing file yields None and a malformed file is ignored with a
//! warning so a bad shutdown never blocks the next start.

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::OrchestrationState;

const STATE_FILE: &str = "state.json";
const PID_FILE: &str = "tc.pid";

/// File-backed persistence for [`OrchestrationState`].
#[derive(Debug, Clone)]
pub struct StateStore {
    dir: PathBuf,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn state_path(&self) -> PathBuf {
        self.dir.join(STATE_FILE)
    }

    pub fn pid_path(&self) -> PathBuf {
        self.dir.join(PID_FILE)
    }

    /// Load the persisted state. Missing or malformed files yield None.
    pub fn load(&self) -> Option<OrchestrationState> {
        let path = self.state_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return None,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "could not read state file");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(state) => Some(state),
            Err(err) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %err,
                    "ignoring malformed state file"
                );
                None
            }
        }
    }

    /// Atomically persist the state (write temp, then rename).
    pub fn save(&self, state: &OrchestrationState) -> DomainResult<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| DomainError::BacklogStore(format!("create {}: {e}", self.dir.display())))?;
        let path = self.state_path();
        let tmp = path.with_extension("json.tmp");
        let raw = serde_json::to_string_pretty(state)?;
        fs::write(&tmp, raw)
            .map_err(|e| DomainError::BacklogStore(format!("write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, &path)
            .map_err(|e| DomainError::BacklogStore(format!("rename {}: {e}", path.display())))?;
        Ok(())
    }

    /// Record this process as the running daemon.
    pub fn write_pid(&self) -> DomainResult<()> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| DomainError::BacklogStore(format!("create {}: {e}", self.dir.display())))?;
        let path = self.pid_path();
        fs::write(&path, std::process::id().to_string())
            .map_err(|e| DomainError::BacklogStore(format!("write {}: {e}", path.display())))
    }

    /// Pid of the running daemon, if any.
    pub fn read_pid(&self) -> Option<i32> {
        read_pid_from(&self.pid_path())
    }

    pub fn clear_pid(&self) {
        let _ = fs::remove_file(self.pid_path());
    }
}

fn read_pid_from(path: &Path) -> Option<i32> {
    let raw = fs::read_to_string(path).ok()?;
    raw.trim().parse().ok()
}
