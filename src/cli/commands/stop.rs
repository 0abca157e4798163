//! `tc stop`: deliver SIGTERM to the daemon recorded in the pid file.

use anyhow::{bail, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

use crate::domain::models::Config;
use crate::services::state_store::StateStore;

pub fn handle_stop(config: &Config) -> Result<()> {
    let store = StateStore::new(config.orchestrator.runtime_dir.clone());
    let Some(pid) = store.read_pid() else {
        bail!("no running orchestrator found (missing pid file)");
    };

    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => {
            println!("Sent SIGTERM to orchestrator (pid {pid}); draining gracefully.");
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) => {
            store.clear_pid();
            bail!("stale pid file (process {pid} not running); cleaned up");
        }
        Err(err) => bail!("could not signal pid {pid}: {err}"),
    }
}
