mod cache;

pub use cache::{SectorCache, active_sectors};

use std::collections::VecDeque;

use crate::protocol::{
    Ack, Cmd, Credentials, Header, HeaderType, ModFrame, ModKind, State, Status,
    next_frame,
};
use crate::save::MemCursor;
use crate::sim::{LocalPipe, Pipe};
use crate::world::{Coord, Mod};

/// How many status lines the proxy keeps around for display.
pub const STATUS_HISTORY: usize = 64;

/// Where the proxy's sim lives.
pub enum ProxyLink {
    Local(LocalPipe),
    Remote(Pipe),
}

/// What the last [`Proxy::update`] did to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Update {
    Nil,
    State,
    /// The mirror was rebuilt from scratch; anything derived from it is
    /// stale.
    Reset,
}

/// Client-side view of a sim: mirrors the confirmed state, keeps the ack
/// watermark and forwards cmds.
pub struct Proxy {
    link: Option<ProxyLink>,
    name: String,
    credentials: Option<Credentials>,
    state: State,
    ack: Ack,
    chunk: Coord,
    selected: Option<Mod>,
    compiled: Option<Mod>,
    sectors: SectorCache,
    logs: VecDeque<Status>,
    payload: MemCursor,
    scratch: MemCursor,
}

impl Proxy {
    /// `name` is used to register with a remote sim when no credentials are
    /// known.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            link: None,
            name: name.into(),
            credentials: None,
            state: State::default(),
            ack: Ack::default(),
            chunk: Coord::NIL,
            selected: None,
            compiled: None,
            sectors: SectorCache::default(),
            logs: VecDeque::with_capacity(STATUS_HISTORY),
            payload: MemCursor::new(),
            scratch: MemCursor::new(),
        }
    }

    pub fn with_credentials(mut self, credentials: Option<Credentials>) -> Self {
        self.credentials = credentials;
        self
    }

    /// Connects to a sim. Remote sims are greeted with the credentials (or a
    /// registration request) and every link is brought up to date with the
    /// current ack and chunk selection.
    pub fn attach(&mut self, link: ProxyLink) {
        let remote = matches!(link, ProxyLink::Remote(_));
        if self.link.replace(link).is_some() {
            log::debug!("replacing previous link");
        }

        if remote {
            match self.credentials {
                Some(creds) => {
                    self.submit(Cmd::Auth {
                        server: creds.server,
                        id: creds.id,
                        private: creds.private,
                    });
                }
                None if !self.name.is_empty() => {
                    let name = self.name.clone();
                    self.submit(Cmd::User { server: 0, name });
                }
                None => {}
            }
        }
        if self.ack.stream != 0 {
            self.submit(Cmd::Ack(self.ack));
        }
        if !self.chunk.is_nil() {
            self.submit(Cmd::Chunk(self.chunk));
        }
    }

    /// Drops the link. The mirror stays readable.
    pub fn detach(&mut self) -> Option<ProxyLink> {
        self.link.take()
    }

    pub fn is_attached(&self) -> bool {
        match &self.link {
            Some(ProxyLink::Local(pipe)) => !pipe.is_closed(),
            Some(ProxyLink::Remote(pipe)) => !pipe.closed(),
            None => false,
        }
    }

    /// Forwards `cmd` to the sim. Returns false, logging why, when it
    /// couldn't be queued.
    pub fn submit(&mut self, cmd: Cmd) -> bool {
        let name = cmd.name();
        if let Cmd::Chunk(coord) = &cmd {
            self.chunk = *coord;
        }

        let sent = match &mut self.link {
            None => {
                log::error!("{name}: not connected");
                return false;
            }
            Some(ProxyLink::Local(pipe)) => pipe.submit(cmd),
            Some(ProxyLink::Remote(pipe)) => {
                self.scratch.clear();
                if let Err(err) = cmd.save(&mut self.scratch) {
                    log::error!("{name}: {err}");
                    return false;
                }
                match pipe.send(HeaderType::Cmd, self.scratch.as_slice()) {
                    Ok(sent) => sent,
                    Err(err) => {
                        log::error!("{name}: {err}");
                        return false;
                    }
                }
            }
        };

        if !sent {
            log::error!("{name}: cmd queue full, dropped");
        }
        sent
    }

    /// Applies everything the sim sent since the last call and acks it.
    pub fn update(&mut self) -> Update {
        let mut update = Update::Nil;

        match self.link.take() {
            None => return Update::Nil,
            Some(ProxyLink::Local(mut pipe)) => {
                while let Some(status) = pipe.read_log() {
                    self.on_status(status);
                }
                if let Some(mut snapshot) = pipe.snapshot() {
                    snapshot.rewind();
                    loop {
                        match next_frame(&mut *snapshot, &mut self.payload) {
                            Ok(Some(header)) => update = update.max(self.on_frame(header)),
                            Ok(None) => break,
                            Err(err) => {
                                log::error!("corrupted snapshot: {err}");
                                break;
                            }
                        }
                    }
                }
                self.link = Some(ProxyLink::Local(pipe));
            }
            Some(ProxyLink::Remote(mut pipe)) => {
                loop {
                    match pipe.recv(&mut self.payload) {
                        Ok(Some(header)) => update = update.max(self.on_frame(header)),
                        Ok(None) => break,
                        Err(err) => {
                            log::error!("dropping link to sim: {err}");
                            pipe.close();
                            break;
                        }
                    }
                }
                self.link = Some(ProxyLink::Remote(pipe));
            }
        }

        if update != Update::Nil {
            self.submit(Cmd::Ack(self.ack));
        }
        update
    }

    fn on_frame(&mut self, header: Header) -> Update {
        match header.kind {
            HeaderType::State => self.on_state(),
            HeaderType::Mod => {
                match ModFrame::load(&mut self.payload) {
                    Ok(frame) => self.on_mod(frame),
                    Err(err) => log::error!("corrupted mod frame: {err}"),
                }
                Update::Nil
            }
            HeaderType::Status => {
                match Status::decode(self.payload.as_slice()) {
                    Ok(status) => self.on_status(status),
                    Err(err) => log::error!("corrupted status frame: {err}"),
                }
                Update::Nil
            }
            HeaderType::User => {
                match Credentials::load(&mut self.payload) {
                    Ok(creds) => {
                        log::info!("registered as user {} on server {:x}", creds.id, creds.server);
                        self.credentials = Some(creds);
                    }
                    Err(err) => log::error!("corrupted user frame: {err}"),
                }
                Update::Nil
            }
            HeaderType::Cmd => {
                log::warn!("sim sent a cmd frame, ignoring");
                Update::Nil
            }
        }
    }

    fn on_state(&mut self) -> Update {
        match self.state.load(&mut self.payload, &mut self.ack) {
            Ok(update) if update.reset => {
                log::debug!("state reset on stream {:x}", self.state.stream);
                self.sectors.clear();
                Update::Reset
            }
            Ok(update) => {
                self.sectors.evict(&update.changed);
                Update::State
            }
            Err(err) => {
                // The ack is left alone so the sim keeps sending deltas
                // against the last state that did apply.
                log::error!("corrupted state: {err}");
                self.sectors.clear();
                Update::Nil
            }
        }
    }

    fn on_mod(&mut self, frame: ModFrame) {
        let slot = match frame.kind {
            ModKind::Select => &mut self.selected,
            ModKind::Compile => &mut self.compiled,
        };
        if let Some(previous) = slot.replace(frame.module) {
            log::debug!("replaced mod {}", previous.id);
        }
    }

    fn on_status(&mut self, status: Status) {
        status.log();
        if self.logs.len() == STATUS_HISTORY {
            self.logs.pop_front();
        }
        self.logs.push_back(status);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn ack(&self) -> &Ack {
        &self.ack
    }

    pub fn chunk(&self) -> Coord {
        self.chunk
    }

    pub fn selected_mod(&self) -> Option<&Mod> {
        self.selected.as_ref()
    }

    pub fn compiled_mod(&self) -> Option<&Mod> {
        self.compiled.as_ref()
    }

    pub fn logs(&self) -> impl Iterator<Item = &Status> {
        self.logs.iter()
    }

    /// Known stars in the sector containing `coord`.
    pub fn sector(&mut self, coord: Coord) -> &[Coord] {
        self.sectors.get(coord, &self.state.chunks)
    }
}
