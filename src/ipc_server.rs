//! IPC Server module for the manual control surface.
//!
//! A Unix Domain Socket server speaking newline-delimited JSON. Debug panels
//! and out-of-process render loops use it to read state, force or clear a
//! quality level, flip the reduced-motion signal, and report frames.

use crate::capability::DeviceClass;
use crate::config::SettingsManager;
use crate::controller::{QualityController, QualityState};
use crate::environment::ReducedMotionFlag;
use crate::error::IpcError;
use crate::frame_sampler::FpsReading;
use crate::quality_table::{QualityConfig, QualityLevel};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(unix)]
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/// Default socket path for IPC communication.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/adaptive-quality.sock";

/// Longest command line accepted before the connection is dropped.
pub const MAX_LINE_BYTES: u64 = 64 * 1024;

/// Commands that can be received via IPC.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "command")]
pub enum IpcCommand {
    GetState,
    /// `null` clears the override.
    SetOverride {
        level: Option<String>,
    },
    SetReducedMotion {
        enabled: bool,
    },
    RecordFrames {
        count: u32,
    },
    /// Persist `enabled` and start or stop evaluation to match.
    SetEnabled {
        enabled: bool,
    },
    GetMetrics,
}

/// State response sent to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StateResponse {
    pub running: bool,
    pub level: QualityLevel,
    pub config: QualityConfig,
    pub fps: FpsReading,
    pub is_emergency: bool,
    pub manual_override: Option<QualityLevel>,
    pub reduced_motion: bool,
    pub device_class: DeviceClass,
}

/// Parse an override level name.
pub fn parse_level(s: &str) -> Result<QualityLevel, IpcError> {
    s.trim().to_lowercase().parse().map_err(IpcError::InvalidCommand)
}

/// Shared daemon state accessible by the IPC server.
pub struct DaemonState {
    pub controller: Arc<QualityController>,
    /// Reduced-motion signal the controller samples
    pub reduced_motion: ReducedMotionFlag,
    pub settings: Arc<SettingsManager>,
}

impl DaemonState {
    pub fn new(
        controller: Arc<QualityController>,
        reduced_motion: ReducedMotionFlag,
        settings: Arc<SettingsManager>,
    ) -> Self {
        Self {
            controller,
            reduced_motion,
            settings,
        }
    }

    pub fn get_state(&self) -> StateResponse {
        let QualityState {
            level,
            config,
            fps,
            is_emergency,
        } = self.controller.state();

        StateResponse {
            running: self.controller.is_running(),
            level,
            config,
            fps,
            is_emergency,
            manual_override: self.controller.manual_override(),
            reduced_motion: self.reduced_motion.get(),
            device_class: self.controller.capability().device_class,
        }
    }
}

fn failure(e: impl std::fmt::Display) -> serde_json::Value {
    serde_json::json!({
        "success": false,
        "error": e.to_string()
    })
}

/// Handle a single IPC command and return the response.
pub fn handle_command(command: IpcCommand, state: &DaemonState) -> serde_json::Value {
    match command {
        IpcCommand::GetState => serde_json::to_value(state.get_state()).unwrap_or_else(failure),

        IpcCommand::SetOverride { level } => {
            let level = match level.as_deref().map(parse_level).transpose() {
                Ok(level) => level,
                Err(e) => return failure(e),
            };
            state.controller.set_manual_override(level);
            let current = state.controller.state().level;
            tracing::info!(override_level = ?level, level = %current, "Override set via IPC");
            serde_json::json!({ "success": true, "level": current })
        }

        IpcCommand::SetReducedMotion { enabled } => {
            state.reduced_motion.set(enabled);
            let current = state.controller.reevaluate().level;
            tracing::info!(enabled, level = %current, "Reduced motion set via IPC");
            serde_json::json!({ "success": true, "level": current })
        }

        IpcCommand::RecordFrames { count } => {
            state.controller.record_frames(count);
            serde_json::json!({ "success": true })
        }

        IpcCommand::SetEnabled { enabled } => {
            let mut settings = state.settings.get();
            settings.enabled = enabled;
            if let Err(e) = state.settings.update(settings) {
                tracing::warn!("Failed to persist settings via IPC: {}", e);
                return failure(e);
            }

            if enabled {
                state.controller.start();
            } else {
                state.controller.stop();
            }
            tracing::info!(enabled, "Evaluation toggled via IPC");
            serde_json::json!({ "success": true, "running": state.controller.is_running() })
        }

        IpcCommand::GetMetrics => {
            serde_json::to_value(state.controller.metrics()).unwrap_or_else(failure)
        }
    }
}

/// Unix Domain Socket server for IPC.
#[cfg(unix)]
pub struct IpcServer {
    socket_path: PathBuf,
    listener: UnixListener,
}

#[cfg(unix)]
impl IpcServer {
    /// Bind a new server at `path`, replacing any stale socket file.
    pub fn new(path: &Path) -> Result<Self, IpcError> {
        Self::cleanup_socket(path)?;

        let listener = UnixListener::bind(path).map_err(|e| IpcError::SocketBindFailed {
            path: path.display().to_string(),
            source: e,
        })?;

        Ok(Self {
            socket_path: path.to_path_buf(),
            listener,
        })
    }

    fn cleanup_socket(path: &Path) -> Result<(), IpcError> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| IpcError::SocketBindFailed {
                path: path.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept connections forever, one task per client.
    pub async fn run(&self, state: Arc<DaemonState>) -> Result<(), IpcError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, state).await {
                            tracing::warn!("Error handling IPC connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Error accepting IPC connection: {}", e);
                }
            }
        }
    }

    async fn handle_connection(stream: UnixStream, state: Arc<DaemonState>) -> Result<(), IpcError> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            let read = (&mut reader)
                .take(MAX_LINE_BYTES + 1)
                .read_line(&mut line)
                .await?;
            if read == 0 {
                break;
            }

            if line.len() as u64 > MAX_LINE_BYTES {
                tracing::warn!(limit = MAX_LINE_BYTES, "IPC command line too long, closing connection");
                let error = IpcError::InvalidCommand(format!(
                    "command line exceeds {} bytes",
                    MAX_LINE_BYTES
                ));
                write_response(&mut writer, &failure(error)).await?;
                break;
            }

            let trimmed = line.trim();
            if !trimmed.is_empty() {
                let response = match serde_json::from_str::<IpcCommand>(trimmed) {
                    Ok(command) => handle_command(command, &state),
                    Err(e) => failure(IpcError::InvalidCommand(e.to_string())),
                };
                write_response(&mut writer, &response).await?;
            }
        }

        Ok(())
    }
}

#[cfg(unix)]
async fn write_response<W>(writer: &mut W, response: &serde_json::Value) -> Result<(), IpcError>
where
    W: AsyncWrite + Unpin,
{
    let response_str = serde_json::to_string(response)?;
    writer.write_all(response_str.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(unix)]
impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}
