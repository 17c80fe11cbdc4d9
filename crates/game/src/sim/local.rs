use std::sync::Arc;

use crate::protocol::{Cmd, Status};
use crate::save::MemCursor;
use crate::sync::{Consumer, Mailbox, Producer, SnapshotGuard, bounded};

pub const CMD_QUEUE: usize = 8;
pub const LOG_QUEUE: usize = 16;

/// In-process endpoint of a sim: a bounded cmd queue in, a bounded status
/// queue out and the snapshot mailbox.
///
/// Snapshots are streams of frames (one `State` frame followed by any `Mod`
/// frames), the same framing remote pipes carry.
pub struct LocalPipe {
    cmds: Producer<Cmd, CMD_QUEUE>,
    logs: Consumer<Status, LOG_QUEUE>,
    mailbox: Arc<Mailbox<MemCursor>>,
}

/// The sim's half of a [`LocalPipe`].
pub(crate) struct LocalEnd {
    pub cmds: Consumer<Cmd, CMD_QUEUE>,
    pub logs: Producer<Status, LOG_QUEUE>,
    pub mailbox: Arc<Mailbox<MemCursor>>,
    /// Buffer the next snapshot is written into. `None` once the mailbox is
    /// shut down.
    pub buf: Option<Box<MemCursor>>,
}

pub(crate) fn local_pair(initial: MemCursor) -> (LocalPipe, LocalEnd) {
    let (cmd_tx, cmd_rx) = bounded::<Cmd, CMD_QUEUE>();
    let (log_tx, log_rx) = bounded::<Status, LOG_QUEUE>();
    let mailbox = Arc::new(Mailbox::new(initial, MemCursor::new()));
    let buf = mailbox.acquire_write();

    let pipe = LocalPipe {
        cmds: cmd_tx,
        logs: log_rx,
        mailbox: Arc::clone(&mailbox),
    };
    let end = LocalEnd {
        cmds: cmd_rx,
        logs: log_tx,
        mailbox,
        buf,
    };
    (pipe, end)
}

impl LocalPipe {
    /// Queues `cmd` for the next drain. Returns false when the queue is full;
    /// the cmd is dropped and retrying is up to the caller.
    pub fn submit(&mut self, cmd: Cmd) -> bool {
        self.cmds.push(cmd).is_ok()
    }

    pub fn read_log(&mut self) -> Option<Status> {
        self.logs.pop()
    }

    /// Takes the latest published snapshot, if one arrived since the last
    /// call.
    pub fn snapshot(&self) -> Option<SnapshotGuard<'_, MemCursor>> {
        self.mailbox.try_read()
    }

    /// True once the sim stopped publishing.
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_shutdown()
    }
}

impl LocalEnd {
    pub fn detached(&self) -> bool {
        self.cmds.is_detached()
    }
}
