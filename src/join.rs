//! Handing a chosen listing to the game client.

use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::JoinError;

/// Something able to start the game client inside a private server.
pub trait HostLauncher: Send + Sync {
    fn launch(&self, place_id: u64, access_code: &str) -> Result<(), JoinError>;
}

/// Launches a configured program as `<program> <placeId> <accessCode>`.
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    program: String,
}

impl CommandLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Starts the program and hands the child to a task that waits on it.
    /// Must be called within a tokio runtime.
    pub fn spawn_reaped(
        &self,
        place_id: u64,
        access_code: &str,
    ) -> Result<JoinHandle<Option<ExitStatus>>, JoinError> {
        let mut child = Command::new(&self.program)
            .arg(place_id.to_string())
            .arg(access_code)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| JoinError::Launch(format!("{}: {e}", self.program)))?;

        let program = self.program.clone();
        Ok(tokio::spawn(async move {
            match child.wait().await {
                Ok(status) => {
                    debug!(%program, %status, "host launcher exited");
                    Some(status)
                }
                Err(e) => {
                    warn!(%program, error = %e, "could not wait on host launcher");
                    None
                }
            }
        }))
    }
}

impl HostLauncher for CommandLauncher {
    fn launch(&self, place_id: u64, access_code: &str) -> Result<(), JoinError> {
        self.spawn_reaped(place_id, access_code).map(|_| ())
    }
}

/// How a join was carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinDispatch {
    /// The caller should open this URI.
    DeepLink(String),
    /// The host launcher accepted the request.
    HostLaunched,
}

pub struct JoinDispatcher {
    place_id: u64,
    scheme: String,
    host: Option<Arc<dyn HostLauncher>>,
}

impl JoinDispatcher {
    pub fn new(place_id: u64, scheme: impl Into<String>, host: Option<Arc<dyn HostLauncher>>) -> Self {
        Self {
            place_id,
            scheme: scheme.into(),
            host,
        }
    }

    pub fn deep_link(&self, access_code: &str) -> String {
        format!(
            "{}://placeId={}&accessCode={}",
            self.scheme, self.place_id, access_code
        )
    }

    pub fn dispatch(&self, access_code: &str, use_deeplink: bool) -> Result<JoinDispatch, JoinError> {
        if access_code.is_empty() {
            return Err(JoinError::MissingAccessCode);
        }
        if use_deeplink {
            info!(place_id = self.place_id, "joining through deep link");
            return Ok(JoinDispatch::DeepLink(self.deep_link(access_code)));
        }
        let host = self.host.as_ref().ok_or(JoinError::MissingHostContext)?;
        host.launch(self.place_id, access_code)?;
        info!(place_id = self.place_id, "joining through host launcher");
        Ok(JoinDispatch::HostLaunched)
    }
}
