use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{Interest, Ready};
use tokio::net::TcpStream;

use crate::sim::Pipe;

use super::{Events, LinkError};

/// Shuttles raw bytes between a socket and one end of a [`Pipe`].
///
/// The link never parses frames and never signals the ring wakes; it only
/// listens to them. Socket bytes go into the pipe's outbound ring, which the
/// frame endpoint on the far side reads, and the inbound ring is flushed to
/// the socket.
pub struct Link {
    stream: TcpStream,
    pipe: Pipe,
    peer: SocketAddr,
}

impl Link {
    pub fn new(stream: TcpStream, pipe: Pipe) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self { stream, pipe, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Socket readiness worth waiting for: reads only while there is room to
    /// put the bytes, writes only while there is something to flush.
    fn interest(&self) -> Option<Interest> {
        let read = self.pipe.tx().free() > 0;
        let write = !self.pipe.rx().is_empty();
        match (read, write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    /// Waits for socket readiness, a ring wake or `timeout`, whichever comes
    /// first. An empty set means the timeout fired.
    pub async fn wait(&self, timeout: Duration) -> Events {
        let interest = self.interest();
        tokio::select! {
            ready = self.stream.ready(interest.unwrap_or(Interest::READABLE)), if interest.is_some() => {
                match ready {
                    Ok(ready) => events(ready),
                    Err(_) => Events::HUP,
                }
            }
            _ = self.pipe.tx().wake().notified() => Events::WAKE,
            _ = self.pipe.rx().wake().notified() => Events::WAKE,
            _ = tokio::time::sleep(timeout) => Events::empty(),
        }
    }

    /// Moves whatever bytes can move without blocking in both directions.
    pub fn on_events(&mut self, events: Events) -> Result<(), LinkError> {
        if events.contains(Events::WAKE) {
            self.pipe.tx().wake_drain();
            self.pipe.rx().wake_drain();
        }
        if self.pipe.closed() {
            return Err(LinkError::Closed);
        }

        self.flush()?;
        self.fill()?;

        if events.contains(Events::HUP) {
            return Err(LinkError::Hangup);
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<usize, LinkError> {
        let (_, rx) = self.pipe.rings_mut();
        let mut total = 0;
        loop {
            let mut cursor = rx.read();
            let written = {
                let chunk = cursor.chunk();
                if chunk.is_empty() {
                    break;
                }
                self.stream.try_write(chunk)
            };
            match written {
                Ok(0) => return Err(LinkError::Hangup),
                Ok(n) => {
                    cursor.consume(n);
                    total += cursor.commit();
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn fill(&mut self) -> Result<usize, LinkError> {
        let (tx, _) = self.pipe.rings_mut();
        let mut total = 0;
        loop {
            let mut cursor = tx.write();
            let read = {
                let chunk = cursor.chunk_mut();
                if chunk.is_empty() {
                    break;
                }
                self.stream.try_read(chunk)
            };
            match read {
                Ok(0) => return Err(LinkError::Hangup),
                Ok(n) => {
                    cursor.advance(n);
                    total += cursor.commit();
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    /// Pushes out what is still buffered for the peer and closes the pipe.
    pub fn finish(mut self) {
        if let Err(err) = self.flush() {
            log::debug!("{}: final flush failed: {err}", self.peer);
        }
        self.pipe.close();
    }
}

fn events(ready: Ready) -> Events {
    let mut events = Events::empty();
    if ready.is_readable() {
        events |= Events::READ;
    }
    if ready.is_writable() {
        events |= Events::WRITE;
    }
    if ready.is_read_closed() || ready.is_write_closed() {
        events |= Events::HUP;
    }
    events
}
