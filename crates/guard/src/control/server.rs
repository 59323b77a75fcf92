#![forbid(unsafe_code)]

use crate::control::protocol::codec;
use crate::control::{ControlChannel, FailureKind, Request, Response};
use crate::error::Error;
use futures::{SinkExt, StreamExt};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::{UnixListener, UnixStream};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Serves a [`ControlChannel`] on a Unix socket.
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    channel: Arc<ControlChannel>,
}

impl ControlServer {
    /// Bind the socket at `path`, replacing a stale one. Only the owner may
    /// connect.
    pub fn bind(path: impl Into<PathBuf>, channel: Arc<ControlChannel>) -> Result<Self, Error> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o755)
                .create(parent)?;
        }
        if path.exists() {
            debug!(path = %path.display(), "removing stale control socket");
            std::fs::remove_file(&path)?;
        }

        let listener = UnixListener::bind(&path)?;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
        info!(path = %path.display(), "control socket listening");
        Ok(Self {
            listener,
            path,
            channel,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until `cancel` fires, then remove the socket.
    pub async fn serve(self, cancel: CancellationToken) -> Result<(), Error> {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        let channel = Arc::clone(&self.channel);
                        let cancel = cancel.child_token();
                        tokio::spawn(async move {
                            if let Err(err) = handle_connection(stream, channel, cancel).await {
                                debug!(%err, "control connection ended with error");
                            }
                        });
                    }
                    Err(err) => warn!(%err, "control socket accept failed"),
                },
            }
        }

        if let Err(err) = std::fs::remove_file(&self.path) {
            warn!(%err, path = %self.path.display(), "failed to remove control socket");
        }
        debug!("control server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: UnixStream,
    channel: Arc<ControlChannel>,
    cancel: CancellationToken,
) -> Result<(), Error> {
    let mut framed = Framed::new(stream, codec());
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            frame = framed.next() => frame,
        };
        let Some(frame) = frame else {
            return Ok(());
        };
        let frame = frame?;

        let response = match Request::decode(&frame) {
            Ok(request) => {
                trace!(request = request.name(), "control request");
                let channel = Arc::clone(&channel);
                // persistence and attribute calls block
                tokio::task::spawn_blocking(move || channel.dispatch(request))
                    .await
                    .unwrap_or_else(|err| Response::Failed {
                        kind: FailureKind::Internal,
                        message: err.to_string(),
                    })
            }
            Err(err) => Response::Failed {
                kind: FailureKind::InvalidInput,
                message: err.to_string(),
            },
        };
        framed.send(response.encode()?).await?;
    }
}
