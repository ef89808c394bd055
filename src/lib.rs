//! Line-oriented TCP broadcast relay.
//!
//! Clients verify themselves with a `CONNECT [user]` handshake, then exchange
//! CRLF-delimited text messages that the relay fans out to every other
//! verified peer. Each module covers one concern:
//!
//! - [`cli`] parses the command-line interface for relay and client modes.
//! - [`frame`] implements the CRLF wire framing shared by both sides.
//! - [`command`] recognizes `\\`-prefixed control messages.
//! - [`registry`] tracks verified connections and delivers broadcasts.
//! - [`relay`] accepts TCP connections and drives one session per socket
//!   through verification, the idle-supervised read loop, and close.
//! - [`client`] is the reference client: stdin in, relayed messages out,
//!   plus a periodic keepalive ping.
//!
//! Integration tests exercise the relay over real sockets; unit tests cover
//! the framing, command parsing, and registry behavior directly.

pub mod cli;
pub mod client;
pub mod command;
pub mod frame;
pub mod registry;
pub mod relay;
