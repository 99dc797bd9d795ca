//! Remote game launcher
//!
//! Thin wrapper over the RPC client for launching and terminating the
//! game on the SUT, with result logging.

use crate::rpc::SutClient;
use playtest_common::protocol::LaunchResponse;
use playtest_common::{Error, Result};
use tracing::{info, warn};

pub struct GameLauncher<'a> {
    sut: &'a SutClient,
}

impl<'a> GameLauncher<'a> {
    pub fn new(sut: &'a SutClient) -> Self {
        Self { sut }
    }

    /// Launch a game on the SUT, optionally tracking a process name
    /// that differs from the executable.
    pub async fn launch(&self, path: &str, process_id: Option<&str>) -> Result<LaunchResponse> {
        if let Some(id) = process_id {
            info!("Launching game with process tracking: {} ({})", path, id);
        } else {
            info!("Launching game: {}", path);
        }

        let response = self.sut.launch(path, process_id).await?;
        if response.status != "success" {
            let message = response
                .error
                .unwrap_or_else(|| "unknown error".to_string());
            return Err(Error::Application(format!("game launch failed: {}", message)));
        }

        info!("Game launched (subprocess pid {})", response.subprocess_pid);
        if let Some(pid) = response.game_process_pid {
            info!("Game process pid: {}", pid);
        }
        if let Some(name) = &response.game_process_name {
            info!("Game process name: {}", name);
        }
        if let Some(warning) = &response.warning {
            warn!("Launch warning: {}", warning);
        }
        Ok(response)
    }

    /// Terminate the currently tracked game on the SUT.
    pub async fn terminate(&self) -> Result<()> {
        let response = self.sut.terminate_game().await?;
        match response.message {
            Some(message) => info!("Game termination: {}", message),
            None => info!("Game terminated"),
        }
        Ok(())
    }
}
