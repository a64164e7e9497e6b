//! Client side of the room protocol
//!
//! A [`ConnectionManager`] owns the socket and is passed explicitly to
//! whatever needs it. A [`RoundSession`] takes the single event subscription
//! and keeps a [`RoundController`] in step with the server.

mod connection;
mod controller;
mod session;

pub use connection::{ConnectionConfig, ConnectionManager, ConnectionStatus, Inbound, Subscription};
pub use controller::{ClientPhase, RoundController};
pub use session::{Expectation, RoundSession, SessionEvent, Submitted};
