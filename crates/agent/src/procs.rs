//! OS process discovery and termination
//!
//! Fuzzy name matching over the process table: a target name matches a
//! process when it is a case-insensitive substring of either the
//! process's reported name or its executable's base filename. All
//! methods take a fresh process-table snapshot and are synchronous;
//! callers on the async side wrap them in `spawn_blocking`.

use playtest_common::protocol::{GameProcessInfo, ProcessInfo};
use std::path::Path;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessesToUpdate, Signal, System};
use tracing::{debug, info, warn};

const DEFAULT_TERMINATE_GRACE: Duration = Duration::from_secs(5);
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Process supervisor over the OS process table.
#[derive(Debug, Clone)]
pub struct ProcessSupervisor {
    /// Bounded wait after a graceful terminate before force-killing.
    grace: Duration,
}

impl Default for ProcessSupervisor {
    fn default() -> Self {
        Self {
            grace: DEFAULT_TERMINATE_GRACE,
        }
    }
}

fn matches_name(process: &sysinfo::Process, needle: &str) -> bool {
    let name = process.name().to_string_lossy().to_lowercase();
    if name.contains(needle) {
        return true;
    }
    process
        .exe()
        .and_then(Path::file_name)
        .map(|f| f.to_string_lossy().to_lowercase().contains(needle))
        .unwrap_or(false)
}

fn snapshot() -> System {
    let mut sys = System::new();
    sys.refresh_processes(ProcessesToUpdate::All, true);
    sys
}

impl ProcessSupervisor {
    pub fn new(grace: Duration) -> Self {
        Self { grace }
    }

    /// Find a running process by fuzzy name match.
    ///
    /// Returns the first match in OS enumeration order; when several
    /// processes match there is no ordering guarantee beyond that.
    /// Processes that cannot be inspected are skipped.
    pub fn find(&self, name: &str) -> Option<ProcessInfo> {
        let needle = name.to_lowercase();
        let sys = snapshot();
        for (pid, process) in sys.processes() {
            if matches_name(process, &needle) {
                let info = ProcessInfo {
                    pid: pid.as_u32(),
                    name: process.name().to_string_lossy().into_owned(),
                    exe: process.exe().map(|p| p.to_string_lossy().into_owned()),
                    create_time: process.start_time(),
                };
                debug!("Found process {} (pid {})", info.name, info.pid);
                return Some(info);
            }
        }
        None
    }

    /// Terminate every process matching `name`.
    ///
    /// Each match gets a graceful terminate, a bounded wait, then a
    /// forced kill on timeout. Returns whether at least one match was
    /// acted on; "no match found" is a normal `false`, never an error.
    pub fn terminate_by_name(&self, name: &str) -> bool {
        let needle = name.to_lowercase();
        let sys = snapshot();

        let targets: Vec<(Pid, String)> = sys
            .processes()
            .iter()
            .filter(|(_, p)| matches_name(p, &needle))
            .map(|(pid, p)| (*pid, p.name().to_string_lossy().into_owned()))
            .collect();

        if targets.is_empty() {
            info!("No processes found with name: {}", name);
            return false;
        }

        for (pid, pname) in &targets {
            if let Some(process) = sys.process(*pid) {
                info!("Terminating process: {} (pid {})", pname, pid);
                if process.kill_with(Signal::Term).is_none() {
                    // Platform without SIGTERM support; go straight to kill.
                    process.kill();
                }
            }
        }

        // Bounded wait for graceful exits, then escalate.
        let deadline = Instant::now() + self.grace;
        let mut sys = sys;
        loop {
            std::thread::sleep(WAIT_POLL_INTERVAL);
            sys.refresh_processes(ProcessesToUpdate::All, true);
            let alive: Vec<&(Pid, String)> = targets
                .iter()
                .filter(|(pid, _)| sys.process(*pid).is_some())
                .collect();
            if alive.is_empty() {
                break;
            }
            if Instant::now() >= deadline {
                for (pid, pname) in alive {
                    if let Some(process) = sys.process(*pid) {
                        warn!("Force killing process: {} (pid {})", pname, pid);
                        process.kill();
                    }
                }
                break;
            }
        }

        info!(
            "Terminated processes: {:?}",
            targets.iter().map(|(_, n)| n.as_str()).collect::<Vec<_>>()
        );
        true
    }

    /// Full process table, one row per inspectable process.
    pub fn list(&self) -> Vec<ProcessInfo> {
        let sys = snapshot();
        sys.processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                exe: process.exe().map(|p| p.to_string_lossy().into_owned()),
                create_time: process.start_time(),
            })
            .collect()
    }

    /// Find a process by name and sample its cpu/memory usage.
    ///
    /// CPU usage needs two refreshes separated by the minimum sampling
    /// interval, so this call blocks for roughly that long.
    pub fn inspect(&self, name: &str) -> Option<GameProcessInfo> {
        let needle = name.to_lowercase();
        let mut sys = System::new();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let pid = sys
            .processes()
            .iter()
            .find(|(_, p)| matches_name(p, &needle))
            .map(|(pid, _)| *pid)?;

        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), false);
        sys.refresh_memory();

        let process = sys.process(pid)?;
        let total = sys.total_memory();
        let memory_percent = if total > 0 {
            (process.memory() as f32 / total as f32) * 100.0
        } else {
            0.0
        };

        Some(GameProcessInfo {
            pid: pid.as_u32(),
            name: process.name().to_string_lossy().into_owned(),
            status: process.status().to_string(),
            cpu_percent: process.cpu_usage(),
            memory_percent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_SUCH_NAME: &str = "playtest-no-such-process-a6f81";

    #[test]
    fn test_find_no_match_returns_none() {
        let supervisor = ProcessSupervisor::default();
        assert!(supervisor.find(NO_SUCH_NAME).is_none());
    }

    #[test]
    fn test_terminate_by_name_no_match_is_false_not_error() {
        let supervisor = ProcessSupervisor::new(Duration::from_millis(100));
        assert!(!supervisor.terminate_by_name(NO_SUCH_NAME));
    }

    #[test]
    fn test_list_contains_current_process() {
        let supervisor = ProcessSupervisor::default();
        let me = std::process::id();
        assert!(supervisor.list().iter().any(|p| p.pid == me));
    }

    #[test]
    fn test_inspect_no_match_returns_none() {
        let supervisor = ProcessSupervisor::default();
        assert!(supervisor.inspect(NO_SUCH_NAME).is_none());
    }
}
