//! Firedeck Network Library
//!
//! Client for the realtime-database push protocol behind a shared
//! estimation session.
//!
//! # Architecture
//!
//! - **Protocol**: JSON frames over a single persistent websocket
//! - **Frame decoder**: classifies inbound frames into typed events
//! - **Transport**: owns the socket, heartbeat, acknowledgement
//!   correlation and the outbound event stream
//!
//! # Usage
//!
//! ```ignore
//! let mut transport = Transport::connect(TransportConfig::new(url)).await?;
//!
//! // Join a game, awaiting each acknowledgement
//! transport.send(1, listen(1, &game_path)).await?;
//!
//! // Observe decoded events
//! while let Some(event) = transport.next_event().await {
//!     match event {
//!         SessionEvent::Game(state) => { /* render */ }
//!         _ => {}
//!     }
//! }
//! ```

pub mod client;
pub mod error;
mod frame;
pub mod protocol;

pub use client::{SessionEvent, Transport, TransportConfig};
pub use error::{Error, Result};
pub use frame::{decode, Inbound};
pub use protocol::{
    keepalive, listen, on_disconnect_put, put, server_timestamp, Acknowledgement, Estimate,
    GameState, Handshake, Participant, Presence, Story, Vote,
};
