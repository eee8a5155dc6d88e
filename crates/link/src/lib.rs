//! Local rendezvous between the scheduler and its forked workers.
//!
//! A worker starts with the server's host, port and its own token on the
//! command line, pulls its job once and pushes its result once.

pub mod client;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod message;
pub mod protocol;
pub mod server;

pub use client::LinkClient;
pub use endpoint::LinkEndpoint;
pub use error::LinkError;
pub use handler::LinkHandler;
pub use message::Message;
pub use server::LinkServer;
