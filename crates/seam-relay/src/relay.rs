//! Relay controller: wires the local endpoint into the session and owns the
//! shutdown sequencing.
//!
//! Frames from producers flow endpoint → controller → session → wire; frames
//! from the wire flow session → registered sink. The controller recognises a
//! single control command, [`DISCONNECT_COMMAND`], which tears the relay down
//! instead of being forwarded.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::endpoint::{Endpoint, socket_path};
use crate::error::RelayError;
use crate::session::{FrameHandler, Session};

/// Literal payload that triggers graceful teardown (case-insensitive
/// substring match, never forwarded upstream).
pub const DISCONNECT_COMMAND: &str = "disconnect";

/// Capacity of the endpoint → controller command queue.
const COMMAND_BUFFER: usize = 32;

/// Configuration for one relay instance.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Channel identifier the rendezvous address is derived from.
    pub channel: String,
    /// WebSocket URL to connect to.
    pub url: String,
    /// Extra headers for the handshake (authentication etc.).
    pub headers: Vec<(String, String)>,
    /// Override for the rendezvous address; defaults to the channel-derived
    /// path.
    pub socket_path: Option<PathBuf>,
}

impl RelayConfig {
    #[must_use]
    pub fn new(channel: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            url: url.into(),
            headers: Vec::new(),
            socket_path: None,
        }
    }
}

fn is_disconnect(frame: &[u8]) -> bool {
    String::from_utf8_lossy(frame)
        .to_ascii_lowercase()
        .contains(DISCONNECT_COMMAND)
}

/// Run a relay until a terminal event: root cancellation, session teardown
/// (peer close or fatal write error), or a local `disconnect` command.
///
/// On any of these the shutdown order is fixed: stop accepting producers,
/// abandon in-flight local frames, close the session, unbind the endpoint.
/// That order avoids writing into a half-closed connection and never leaves
/// a stale rendezvous address behind a dead session.
///
/// # Errors
///
/// Startup errors (`AddressInUse`, handshake rejection) are returned before
/// any traffic flows; the endpoint is released first. Teardown errors from
/// `close()` and `unbind()` propagate rather than being swallowed.
pub async fn run(
    config: RelayConfig,
    root: CancellationToken,
    sink: FrameHandler,
) -> Result<(), RelayError> {
    let path = config
        .socket_path
        .clone()
        .unwrap_or_else(|| socket_path(&config.channel));

    // Bind first: failing fast on a busy channel beats tearing down a
    // freshly established upstream session.
    let endpoint = Endpoint::bind_at(path).await?;

    let mut session = match Session::connect(&config.url, &config.headers, &root).await {
        Ok(session) => session,
        Err(err) => {
            // Startup failure after a partial bind still releases the address.
            let mut endpoint = endpoint;
            if let Err(unbind_err) = endpoint.unbind() {
                warn!("failed to unbind after connect failure: {unbind_err}");
            }
            return Err(err.into());
        }
    };

    session.register_handler(sink)?;
    session.start()?;

    let session_scope = session.scope().clone();
    let accept_token = session_scope.child_token();
    let (cmd_tx, mut cmd_rx) = mpsc::channel::<Vec<u8>>(COMMAND_BUFFER);

    let loop_token = accept_token.clone();
    let accept_task = tokio::spawn(async move {
        endpoint
            .accept_loop(&loop_token, |frame| {
                let tx = cmd_tx.clone();
                async move {
                    if tx.send(frame).await.is_err() {
                        debug!("relay loop gone, dropping local frame");
                    }
                }
            })
            .await;
        endpoint
    });

    info!("relay up: channel {} -> {}", config.channel, config.url);
    loop {
        tokio::select! {
            () = root.cancelled() => {
                info!("relay cancelled");
                break;
            }
            () = session_scope.cancelled() => {
                info!("session ended, tearing down");
                break;
            }
            cmd = cmd_rx.recv() => match cmd {
                Some(frame) if is_disconnect(&frame) => {
                    info!("disconnect command received");
                    break;
                }
                Some(frame) => session.send(frame).await,
                None => {
                    debug!("local endpoint stopped");
                    break;
                }
            },
        }
    }

    // Shutdown ordering per the contract above.
    accept_token.cancel();
    let close_result = session.close().await;
    let mut endpoint = accept_task.await?;
    let unbind_result = endpoint.unbind();

    close_result?;
    unbind_result?;
    info!("relay stopped: channel {}", config.channel);
    Ok(())
}
