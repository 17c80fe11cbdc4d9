use crate::protocol::{Header, HeaderType, ProtocolError, read_frame, write_frame};
use crate::save::{MemCursor, RingReader, RingWriter, SaveRing};
use crate::sync::Producer;

pub(crate) const ATTACH_QUEUE: usize = 16;

/// One end of a bidirectional frame channel built from two rings.
///
/// Frame endpoints (the sim and a proxy) signal the ring wakes after sending
/// or receiving so the byte shuttle on the other side of each ring learns
/// about new data or freed space.
pub struct Pipe {
    tx: RingWriter,
    rx: RingReader,
}

impl Pipe {
    /// Returns two connected ends: bytes sent on the first arrive on the
    /// second through a ring of `cap_ab` bytes, and the other way round
    /// through `cap_ba`.
    pub fn pair(cap_ab: usize, cap_ba: usize) -> (Pipe, Pipe) {
        let (a_tx, b_rx) = SaveRing::new(cap_ab);
        let (b_tx, a_rx) = SaveRing::new(cap_ba);
        (Pipe { tx: a_tx, rx: a_rx }, Pipe { tx: b_tx, rx: b_rx })
    }

    /// Writes one frame. `Ok(false)` means it doesn't fit right now and
    /// nothing was written.
    pub fn send(&mut self, kind: HeaderType, payload: &[u8]) -> Result<bool, ProtocolError> {
        let sent = write_frame(&mut self.tx, kind, payload)?;
        if sent {
            self.tx.wake_signal();
        }
        Ok(sent)
    }

    pub fn recv(&mut self, payload: &mut MemCursor) -> Result<Option<Header>, ProtocolError> {
        let header = read_frame(&mut self.rx, payload)?;
        if header.is_some() {
            self.rx.wake_signal();
        }
        Ok(header)
    }

    /// Raw ring access for the byte shuttle.
    pub fn rings_mut(&mut self) -> (&mut RingWriter, &mut RingReader) {
        (&mut self.tx, &mut self.rx)
    }

    pub fn tx(&self) -> &RingWriter {
        &self.tx
    }

    pub fn rx(&self) -> &RingReader {
        &self.rx
    }

    pub fn close(&self) {
        self.tx.close();
        self.rx.close();
    }

    pub fn closed(&self) -> bool {
        self.tx.closed() || self.rx.closed()
    }
}

impl Drop for Pipe {
    fn drop(&mut self) {
        self.close();
    }
}

/// Hands new pipes to a running sim. Owned by whatever accepts peers.
pub struct PipeFactory {
    attach: Producer<Pipe, ATTACH_QUEUE>,
    state_ring_size: usize,
    cmd_ring_size: usize,
}

impl PipeFactory {
    pub(crate) fn new(
        attach: Producer<Pipe, ATTACH_QUEUE>,
        state_ring_size: usize,
        cmd_ring_size: usize,
    ) -> Self {
        Self {
            attach,
            state_ring_size,
            cmd_ring_size,
        }
    }

    /// Creates a pipe, passes its sim end to the sim and returns the peer
    /// end. Returns `None` when the sim has a backlog of unattached pipes.
    pub fn open(&mut self) -> Option<Pipe> {
        let (sim, peer) = Pipe::pair(self.state_ring_size, self.cmd_ring_size);
        match self.attach.push(sim) {
            Ok(()) => Some(peer),
            Err(sim) => {
                // Dropping the sim end closes both rings for the peer too.
                drop(sim);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_cross_in_both_directions() {
        let (mut a, mut b) = Pipe::pair(64, 64);
        let mut payload = MemCursor::new();

        assert!(a.send(HeaderType::Cmd, b"ping").unwrap());
        let header = b.recv(&mut payload).unwrap().unwrap();
        assert_eq!(header.kind, HeaderType::Cmd);
        assert_eq!(payload.as_slice(), b"ping");

        assert!(b.send(HeaderType::State, b"pong").unwrap());
        assert!(a.recv(&mut payload).unwrap().is_some());
        assert_eq!(payload.as_slice(), b"pong");
        assert!(a.recv(&mut payload).unwrap().is_none());
    }

    #[test]
    fn dropping_one_end_closes_the_other() {
        let (a, b) = Pipe::pair(16, 16);
        assert!(!b.closed());
        drop(a);
        assert!(b.closed());
    }

    #[test]
    fn send_signals_the_wake() {
        let (mut a, _b) = Pipe::pair(64, 64);
        a.tx().wake_drain();
        assert!(a.send(HeaderType::Status, &[0; 4]).unwrap());
        assert_eq!(a.tx().wake_drain(), 1);
    }
}
