//! An asynchronous IRC client protocol engine: line decoding, message and
//! mode parsing, ISUPPORT tracking, CTCP, DCC, a priority-ordered handler
//! reactor, and a single-server [`client::Client`] built on top of it.
//!
//! The crate is split into sans-IO pieces (parsing, case folding, mode
//! strings, ISUPPORT) that never touch a socket, and IO-carrying pieces
//! (connection, dcc, reactor) that do. Everything above the socket layer is
//! reachable without a live connection, which is what makes the parser-level
//! unit and property tests possible without `tokio::test`.

pub mod casefold;
pub mod client;
pub mod connection;
pub mod ctcp;
pub mod dcc;
pub mod error;
pub mod isupport;
pub mod line_buffer;
pub mod message;
pub mod mode;
pub mod numerics;
pub mod reactor;
pub mod scheduler;
pub mod socket;

pub use client::Client;
pub use connection::{CapSubCommand, ConnectParams, ConnectionState, ServerConnection};
pub use error::{CoreError, MessageParseError, ModeParseError, Result};
pub use message::{Event, NickMask, Tag};
pub use reactor::{ConnectionHandle, DccHandle, HandlerId, HandlerResult, Reactor};
