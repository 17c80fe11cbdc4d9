pub mod mailbox;
pub mod queue;

pub use mailbox::{Mailbox, SnapshotGuard};
pub use queue::{Consumer, Producer, bounded};
