//! Session relay: one persistent WebSocket connection, one local command
//! socket, and the controller that shuttles opaque byte frames between them.
//!
//! Short-lived producer processes publish newline-delimited frames into the
//! rendezvous socket; the relay forwards them upstream in producer order and
//! hands every inbound frame to a registered sink. The relay never interprets
//! payloads — the single exception is the [`relay::DISCONNECT_COMMAND`]
//! control frame, which tears the relay down.
//!
//! # Example
//!
//! ```no_run
//! use seam_relay::{CancellationToken, RelayConfig};
//!
//! # async fn example() -> Result<(), seam_relay::RelayError> {
//! let root = CancellationToken::new();
//! let config = RelayConfig::new("maker-1", "wss://venue.example/ws");
//!
//! seam_relay::run(
//!     config,
//!     root,
//!     Box::new(|frame| println!("{}", String::from_utf8_lossy(&frame))),
//! )
//! .await?;
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod relay;
pub mod session;

pub use codec::{CodecError, FrameCodec};
pub use endpoint::{Endpoint, EndpointError, publish, publish_at, socket_path};
pub use error::{RelayError, Result};
pub use relay::{DISCONNECT_COMMAND, RelayConfig, run};
pub use session::{ConnectError, FrameHandler, Session, SessionError, SessionState};

// Producers and hosts share the relay's cancellation primitive.
pub use tokio_util::sync::CancellationToken;
