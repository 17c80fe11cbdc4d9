pub mod net;
pub mod protocol;
pub mod proxy;
pub mod save;
pub mod sim;
pub mod sync;
pub mod world;

pub use net::{Backoff, Client, ClientOptions, Events, Link, LinkError, Server};
pub use protocol::{
    Ack, Cmd, Credentials, Header, HeaderType, ModFrame, ModKind, ProtocolError, Speed, State,
    Status, StatusType,
};
pub use proxy::{Proxy, ProxyLink, Update};
pub use save::{MemCursor, SaveCursor, SaveError, SaveFile, SaveRing};
pub use sim::{LocalPipe, Pipe, PipeFactory, Sim, SimConfig, SimThread, Users};
pub use sync::{Consumer, Mailbox, Producer, bounded};
pub use world::{Coord, Mod, ModCompiler, ModId, Universe, World};

pub const DEFAULT_PORT: u16 = 18181;
