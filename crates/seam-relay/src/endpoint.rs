//! Local rendezvous endpoint: a Unix socket producers publish into.
//!
//! The socket path is derived deterministically from the channel identifier,
//! so a producer needs nothing beyond the channel name to find a running
//! relay. The endpoint owns the path for the lifetime of the bind and removes
//! it on every exit path.

use std::io;
use std::path::{Path, PathBuf};

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::{UnixListener, UnixStream};
use tokio::time::Duration;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{CodecError, FrameCodec};

/// How long `accept` may block before cancellation is re-checked.
const ACCEPT_DEADLINE: Duration = Duration::from_secs(1);

/// Errors from binding, accepting, or publishing.
#[derive(Debug, thiserror::Error)]
pub enum EndpointError {
    /// Another live relay already holds this channel's address.
    #[error("address already in use: {0}")]
    AddressInUse(PathBuf),

    #[error("failed to bind {path}: {source}")]
    Bind { path: PathBuf, source: io::Error },

    /// No relay is bound to the channel a producer published into.
    #[error("no relay listening on {0}")]
    NoListener(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

/// Runtime directory for rendezvous sockets.
///
/// Prefers `$XDG_RUNTIME_DIR`, falling back to the system temp directory.
fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR").map_or_else(|_| std::env::temp_dir(), PathBuf::from)
}

/// Rendezvous address for a channel identifier.
#[must_use]
pub fn socket_path(channel: &str) -> PathBuf {
    runtime_dir().join(format!("{channel}.sock"))
}

/// The relay-side listener for one channel.
pub struct Endpoint {
    path: PathBuf,
    listener: Option<UnixListener>,
}

impl Endpoint {
    /// Bind the rendezvous address for `channel`.
    ///
    /// # Errors
    ///
    /// [`EndpointError::AddressInUse`] if another live relay holds the
    /// address; [`EndpointError::Bind`] for any other creation failure.
    pub async fn bind(channel: &str) -> Result<Self, EndpointError> {
        Self::bind_at(socket_path(channel)).await
    }

    /// Bind at an explicit path (used by tests and custom deployments).
    ///
    /// A leftover socket file whose owner is gone accepts no connections; it
    /// is removed and the address reclaimed. A live listener yields
    /// [`EndpointError::AddressInUse`].
    ///
    /// # Errors
    ///
    /// See [`Endpoint::bind`].
    pub async fn bind_at(path: PathBuf) -> Result<Self, EndpointError> {
        if path.exists() {
            if UnixStream::connect(&path).await.is_ok() {
                return Err(EndpointError::AddressInUse(path));
            }
            info!("removing stale socket at {}", path.display());
            std::fs::remove_file(&path).map_err(|source| EndpointError::Bind {
                path: path.clone(),
                source,
            })?;
        }

        let listener = UnixListener::bind(&path).map_err(|source| {
            if source.kind() == io::ErrorKind::AddrInUse {
                EndpointError::AddressInUse(path.clone())
            } else {
                EndpointError::Bind {
                    path: path.clone(),
                    source,
                }
            }
        })?;

        info!("listening on {}", path.display());
        Ok(Self {
            path,
            listener: Some(listener),
        })
    }

    /// The bound rendezvous address.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept producers until `token` is cancelled.
    ///
    /// One producer is serviced at a time — producers are one-shot writers,
    /// and sequential servicing is what preserves per-producer frame order
    /// without sequence numbers. Each complete newline-delimited frame is
    /// awaited through `on_frame`; a producer's read error ends only that
    /// producer's connection.
    pub async fn accept_loop<F, Fut>(&self, token: &CancellationToken, mut on_frame: F)
    where
        F: FnMut(Vec<u8>) -> Fut,
        Fut: Future<Output = ()>,
    {
        let Some(listener) = self.listener.as_ref() else {
            warn!("accept loop started on an unbound endpoint");
            return;
        };

        loop {
            let stream = tokio::select! {
                () = token.cancelled() => {
                    debug!("accept loop: cancelled");
                    return;
                }
                accepted = tokio::time::timeout(ACCEPT_DEADLINE, listener.accept()) => {
                    match accepted {
                        Err(_) => continue, // deadline expired, re-check cancellation
                        Ok(Ok((stream, _addr))) => stream,
                        Ok(Err(err)) => {
                            warn!("accept error: {err}");
                            continue;
                        }
                    }
                }
            };

            debug!("producer connected");
            let mut frames = Framed::new(stream, FrameCodec::new());
            loop {
                tokio::select! {
                    () = token.cancelled() => {
                        debug!("accept loop: cancelled mid-producer");
                        return;
                    }
                    frame = frames.next() => match frame {
                        Some(Ok(frame)) => {
                            if frame.is_empty() {
                                continue;
                            }
                            on_frame(frame).await;
                        }
                        Some(Err(err)) => {
                            warn!("producer read error: {err}");
                            break;
                        }
                        None => break, // producer closed its side
                    },
                }
            }
            debug!("producer disconnected");
        }
    }

    /// Close the listener and remove the rendezvous address. Idempotent;
    /// runs on every exit path (see also the `Drop` backstop).
    ///
    /// # Errors
    ///
    /// Returns the removal error if the socket file cannot be deleted.
    pub fn unbind(&mut self) -> Result<(), EndpointError> {
        if self.listener.take().is_none() {
            return Ok(());
        }
        debug!("unbinding {}", self.path.display());
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(EndpointError::Io(err)),
        }
    }
}

impl Drop for Endpoint {
    fn drop(&mut self) {
        // Backstop for panics and early error returns; normal shutdown goes
        // through unbind().
        if self.listener.take().is_some()
            && let Err(err) = std::fs::remove_file(&self.path)
            && err.kind() != io::ErrorKind::NotFound
        {
            warn!("failed to remove socket {}: {err}", self.path.display());
        }
    }
}

/// Publish one frame to the relay bound at `channel`.
///
/// Producer-side counterpart of the accept loop: a short-lived connection
/// that writes the frame plus its delimiter and closes.
///
/// # Errors
///
/// [`EndpointError::NoListener`] if no relay is bound to the channel.
pub async fn publish(channel: &str, frame: &[u8]) -> Result<(), EndpointError> {
    publish_at(&socket_path(channel), frame).await
}

/// Publish one frame to an explicit rendezvous path.
///
/// # Errors
///
/// See [`publish`].
pub async fn publish_at(path: &Path, frame: &[u8]) -> Result<(), EndpointError> {
    let stream = match UnixStream::connect(path).await {
        Ok(stream) => stream,
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::ConnectionRefused
            ) =>
        {
            return Err(EndpointError::NoListener(path.to_path_buf()));
        }
        Err(err) => return Err(EndpointError::Io(err)),
    };

    let mut framed = Framed::new(stream, FrameCodec::new());
    framed.send(frame.to_vec()).await?;
    framed.get_mut().shutdown().await?;
    Ok(())
}
