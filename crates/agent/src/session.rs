//! Game process lifecycle
//!
//! One lifecycle slot per agent: the locally spawned subprocess handle
//! plus the expected OS process name. At most one game process is
//! tracked at a time; a new launch first terminates the previously
//! tracked identity both by name and by local handle. The slot's mutex
//! is held for the whole compound launch/terminate sequence, settle
//! sleeps included, so concurrent launch/terminate requests serialize.
//! Screenshot and action endpoints never touch this lock.

use crate::procs::ProcessSupervisor;
use playtest_common::protocol::{GameStatus, LaunchResponse};
use playtest_common::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Settle and grace windows for launch/terminate sequences.
#[derive(Debug, Clone)]
pub struct SessionTiming {
    /// Window after spawn in which an exit counts as launch failure.
    pub spawn_settle: Duration,
    /// Extra window before searching the process table for the game.
    pub discover_settle: Duration,
    /// Bounded wait after a graceful terminate before force-killing.
    pub terminate_grace: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            spawn_settle: Duration::from_secs(3),
            discover_settle: Duration::from_secs(2),
            terminate_grace: Duration::from_secs(5),
        }
    }
}

#[derive(Default)]
struct Slot {
    child: Option<Child>,
    expected_name: Option<String>,
}

/// Outcome of a terminate request. "Nothing to terminate" is success.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminateReport {
    pub terminated: bool,
    pub message: Option<String>,
}

/// Owns the tracked game process.
pub struct GameSession {
    slot: Mutex<Slot>,
    supervisor: ProcessSupervisor,
    timing: SessionTiming,
}

impl GameSession {
    pub fn new(timing: SessionTiming) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            supervisor: ProcessSupervisor::new(timing.terminate_grace),
            timing,
        }
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Launch a game executable, replacing any tracked process.
    ///
    /// Launch fails only if the spawned process exits within the first
    /// settle window; failing to *discover* the game process afterwards
    /// is reported as a warning, not an error.
    pub async fn launch(&self, path: &str, process_id: Option<&str>) -> Result<LaunchResponse> {
        let mut slot = self.slot.lock().await;

        // Tear down the previously tracked identity: by name first,
        // then by local handle.
        if let Some(previous) = slot.expected_name.take() {
            info!("Terminating existing game process: {}", previous);
            self.terminate_by_name_blocking(previous).await?;
        }
        if let Some(mut child) = slot.child.take() {
            if child.try_wait()?.is_none() {
                info!("Terminating existing game subprocess");
                self.stop_child(&mut child).await;
            }
        }

        let expected_name = match process_id {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.to_string()),
        };

        info!("Launching game: {} (expected process: {})", path, expected_name);
        let mut child = Command::new(path)
            .spawn()
            .map_err(|e| Error::Process(format!("failed to spawn {}: {}", path, e)))?;
        let subprocess_pid = child.id().unwrap_or_default();

        tokio::time::sleep(self.timing.spawn_settle).await;
        if let Some(status) = child.try_wait()? {
            return Err(Error::Process(format!(
                "game subprocess exited during startup ({})",
                status
            )));
        }

        // The game may re-exec or spawn its real process; give it time
        // to surface before searching the process table.
        tokio::time::sleep(self.timing.discover_settle).await;
        let found = {
            let supervisor = self.supervisor.clone();
            let name = expected_name.clone();
            tokio::task::spawn_blocking(move || supervisor.find(&name))
                .await
                .map_err(|e| Error::Internal(e.to_string()))?
        };

        slot.expected_name = Some(expected_name.clone());
        slot.child = Some(child);

        let mut response = LaunchResponse {
            status: "success".to_string(),
            subprocess_pid,
            game_process_pid: None,
            game_process_name: None,
            warning: None,
            error: None,
        };
        match found {
            Some(process) => {
                info!("Game process found: {} (pid {})", process.name, process.pid);
                response.game_process_pid = Some(process.pid);
                response.game_process_name = Some(process.name);
            }
            None => {
                warn!("Could not find game process with name: {}", expected_name);
                response.warning =
                    Some(format!("Could not verify game process: {}", expected_name));
            }
        }
        Ok(response)
    }

    /// Terminate the tracked game, by name and by handle. Idempotent.
    pub async fn terminate(&self) -> Result<TerminateReport> {
        let mut slot = self.slot.lock().await;
        let mut terminated = false;

        if let Some(name) = slot.expected_name.take() {
            info!("Terminating game by process name: {}", name);
            if self.terminate_by_name_blocking(name).await? {
                terminated = true;
            }
        }

        if let Some(mut child) = slot.child.take() {
            if child.try_wait()?.is_none() {
                info!("Terminating game subprocess");
                self.stop_child(&mut child).await;
                terminated = true;
            }
        }

        Ok(TerminateReport {
            terminated,
            message: if terminated {
                None
            } else {
                Some("No running game to terminate".to_string())
            },
        })
    }

    /// Snapshot of the tracked process state.
    pub async fn status(&self) -> Result<GameStatus> {
        let mut slot = self.slot.lock().await;

        let (subprocess_running, subprocess_pid) = match slot.child.as_mut() {
            Some(child) => match child.try_wait()? {
                None => (true, child.id()),
                Some(_) => (false, None),
            },
            None => (false, None),
        };
        let expected_process_name = slot.expected_name.clone();
        drop(slot);

        let actual_game_process = match &expected_process_name {
            Some(name) => {
                let supervisor = self.supervisor.clone();
                let name = name.clone();
                tokio::task::spawn_blocking(move || supervisor.inspect(&name))
                    .await
                    .map_err(|e| Error::Internal(e.to_string()))?
            }
            None => None,
        };

        Ok(GameStatus {
            subprocess_running,
            subprocess_pid,
            expected_process_name,
            actual_game_process,
        })
    }

    async fn terminate_by_name_blocking(&self, name: String) -> Result<bool> {
        let supervisor = self.supervisor.clone();
        tokio::task::spawn_blocking(move || supervisor.terminate_by_name(&name))
            .await
            .map_err(|e| Error::Internal(e.to_string()))
    }

    /// Graceful stop of the local child: SIGTERM, bounded wait, SIGKILL.
    async fn stop_child(&self, child: &mut Child) {
        #[cfg(unix)]
        if let Some(pid) = child.id() {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        }

        match tokio::time::timeout(self.timing.terminate_grace, child.wait()).await {
            Ok(Ok(status)) => info!("Game subprocess exited: {}", status),
            Ok(Err(e)) => warn!("Wait for game subprocess failed: {}", e),
            Err(_) => {
                warn!("Game subprocess did not exit in time, force killing");
                if let Err(e) = child.kill().await {
                    warn!("Force kill failed: {}", e);
                }
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;

    fn fast_timing() -> SessionTiming {
        SessionTiming {
            spawn_settle: Duration::from_millis(100),
            discover_settle: Duration::from_millis(50),
            terminate_grace: Duration::from_secs(2),
        }
    }

    /// Copy /bin/sleep under a unique name so fuzzy matching cannot
    /// touch unrelated processes.
    fn unique_sleep_binary(dir: &tempfile::TempDir, tag: &str) -> String {
        let name = format!("playtest-dummy-{}-{}", tag, std::process::id());
        let dest = dir.path().join(&name);
        std::fs::copy("/bin/sleep", &dest).unwrap();
        let mut perms = std::fs::metadata(&dest).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&dest, perms).unwrap();
        dest.to_string_lossy().into_owned()
    }

    fn pid_alive(pid: u32) -> bool {
        use nix::sys::signal::kill;
        use nix::unistd::Pid;
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    #[tokio::test]
    async fn test_launch_spawns_and_terminate_clears() {
        let dir = tempfile::TempDir::new().unwrap();
        // `sleep` with no args exits immediately with an error, so give
        // the binary an argument via a wrapper script.
        let bin = unique_sleep_binary(&dir, "a");
        let script = dir.path().join("run.sh");
        std::fs::write(&script, format!("#!/bin/sh\nexec {} 60\n", bin)).unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let session = GameSession::new(fast_timing());
        let name = std::path::Path::new(&bin)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();
        let response = session
            .launch(&script.to_string_lossy(), Some(&name))
            .await
            .unwrap();
        assert_eq!(response.status, "success");
        assert!(response.subprocess_pid > 0);

        let status = session.status().await.unwrap();
        assert!(status.subprocess_running);
        assert_eq!(status.expected_process_name.as_deref(), Some(name.as_str()));

        let report = session.terminate().await.unwrap();
        assert!(report.terminated);

        // Second terminate is idempotent success with a message.
        let again = session.terminate().await.unwrap();
        assert!(!again.terminated);
        assert_eq!(again.message.as_deref(), Some("No running game to terminate"));
    }

    #[tokio::test]
    async fn test_relaunch_terminates_tracked_process() {
        let dir = tempfile::TempDir::new().unwrap();
        let bin = unique_sleep_binary(&dir, "b");
        let script = dir.path().join("run.sh");
        std::fs::write(&script, format!("#!/bin/sh\nexec {} 60\n", bin)).unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();
        let script = script.to_string_lossy().into_owned();
        let name = std::path::Path::new(&bin)
            .file_name()
            .unwrap()
            .to_string_lossy()
            .into_owned();

        let session = GameSession::new(fast_timing());
        let first = session.launch(&script, Some(&name)).await.unwrap();
        let first_pid = first.subprocess_pid;
        assert!(pid_alive(first_pid));

        let second = session.launch(&script, Some(&name)).await.unwrap();
        assert_ne!(second.subprocess_pid, first_pid);
        // The first tracked process must be gone before the new spawn.
        assert!(!pid_alive(first_pid));

        session.terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_launch_fails_when_process_exits_early() {
        let dir = tempfile::TempDir::new().unwrap();
        let script = dir.path().join("fail.sh");
        std::fs::write(&script, "#!/bin/sh\nexit 7\n").unwrap();
        let mut perms = std::fs::metadata(&script).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).unwrap();

        let session = GameSession::new(fast_timing());
        let err = session
            .launch(&script.to_string_lossy(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Process(_)), "got {:?}", err);
    }
}
