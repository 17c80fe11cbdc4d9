mod backoff;
mod client;
mod link;
mod server;

pub use backoff::{BACKOFF_CAP, Backoff};
pub use client::{Client, ClientOptions};
pub use link::Link;
pub use server::Server;

use std::io;

use bitflags::bitflags;

bitflags! {
    /// Readiness reported by [`Link::wait`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Events: u8 {
        const READ = 1 << 0;
        const WRITE = 1 << 1;
        const HUP = 1 << 2;
        /// One of the pipe's rings was signalled by its frame endpoint.
        const WAKE = 1 << 3;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
    #[error("peer hung up")]
    Hangup,
    #[error("pipe closed")]
    Closed,
}
