mod config;
mod local;
mod pipe;
mod users;

pub use config::SimConfig;
pub use local::{CMD_QUEUE, LOG_QUEUE, LocalPipe};
pub use pipe::{Pipe, PipeFactory};
pub use users::Users;

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::protocol::{
    Ack, Cmd, HeaderType, MAX_IO_ARGS, ModFrame, ModKind, ProtocolError, Speed, StateCtx, Status,
    UserId, append_frame, save_state,
};
use crate::save::{Magic, MemCursor, SAVE_VERSION, SaveCursor, SaveError, SaveFile, SaveResult};
use crate::sync::{Consumer, Mailbox, bounded};
use crate::world::{Coord, Mod, ModCompiler, ModId, ModMaj, SourceCompiler, Tick, World};

use local::{LocalEnd, local_pair};
use pipe::ATTACH_QUEUE;

/// What a single peer has told the sim about itself.
#[derive(Debug, Default)]
struct Session {
    ack: Ack,
    chunk: Coord,
    user: Option<UserId>,
    /// Selected published mod and the tick it was selected at.
    select: Option<(ModId, Tick)>,
    /// Latest compile candidate and the tick it was produced at.
    compile: Option<(Mod, Tick)>,
}

impl Session {
    /// Mod frames the peer hasn't confirmed yet. A frame counts as delivered
    /// once the peer acks a state newer than the tick it was produced at.
    fn pending_mods<W: World>(&self, world: &W, stream: u64) -> Vec<ModFrame> {
        let delivered = |ts: Tick| self.ack.stream == stream && self.ack.time > ts;
        let mut frames = Vec::new();

        if let Some((id, ts)) = self.select {
            match world.mods().get(id) {
                Some(module) if !delivered(ts) => frames.push(ModFrame {
                    kind: ModKind::Select,
                    module: module.clone(),
                }),
                _ => {}
            }
        }
        if let Some((module, ts)) = &self.compile {
            if !delivered(*ts) {
                frames.push(ModFrame {
                    kind: ModKind::Compile,
                    module: module.clone(),
                });
            }
        }
        frames
    }

    /// Moves pending deliveries onto a new timeline after a load.
    fn rebase(&mut self, time: Tick) {
        if let Some((_, ts)) = &mut self.select {
            *ts = time;
        }
        if let Some((_, ts)) = &mut self.compile {
            *ts = time;
        }
    }
}

struct Remote {
    pipe: Pipe,
    session: Session,
    logs: VecDeque<Status>,
}

impl Remote {
    fn new(pipe: Pipe) -> Self {
        Self {
            pipe,
            session: Session::default(),
            logs: VecDeque::with_capacity(LOG_QUEUE),
        }
    }

    fn log(&mut self, status: Status) {
        if self.logs.len() >= LOG_QUEUE {
            status.log();
            return;
        }
        self.logs.push_back(status);
    }

    /// Sends queued status lines until the ring is full.
    fn flush_logs(&mut self) {
        while let Some(status) = self.logs.front() {
            match self.pipe.send(HeaderType::Status, &status.encode()) {
                Ok(true) => {
                    self.logs.pop_front();
                }
                Ok(false) => break,
                Err(err) => {
                    log::error!("status frame rejected: {err}");
                    self.logs.pop_front();
                }
            }
        }
    }
}

struct Local {
    end: LocalEnd,
    session: Session,
}

impl Local {
    fn log(&mut self, status: Status) {
        if let Err(status) = self.end.logs.push(status) {
            status.log();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Local,
    Remote(usize),
}

/// The simulation engine. Owns the world and every channel into and out of
/// it; runs on its own thread via [`Sim::spawn`].
pub struct Sim<W: World> {
    config: SimConfig,
    world: W,
    speed: Speed,
    stream: u64,
    users: Users,
    compiler: Box<dyn ModCompiler>,
    running: Arc<AtomicBool>,
    local: Option<Local>,
    attach: Option<Consumer<Pipe, ATTACH_QUEUE>>,
    remotes: Vec<Remote>,
    next: Instant,
    dirty: bool,
    payload: MemCursor,
    scratch: MemCursor,
}

impl<W: World> Sim<W> {
    pub fn new(world: W, config: SimConfig) -> Self {
        Self {
            config,
            world,
            speed: Speed::Paused,
            stream: rand_u64() | 1,
            users: Users::new(),
            compiler: Box::new(SourceCompiler),
            running: Arc::new(AtomicBool::new(true)),
            local: None,
            attach: None,
            remotes: Vec::new(),
            next: Instant::now(),
            dirty: false,
            payload: MemCursor::new(),
            scratch: MemCursor::new(),
        }
    }

    pub fn with_compiler(mut self, compiler: impl ModCompiler + 'static) -> Self {
        self.compiler = Box::new(compiler);
        self
    }

    pub fn with_speed(mut self, speed: Speed) -> Self {
        self.speed = speed;
        self
    }

    pub fn world(&self) -> &W {
        &self.world
    }

    pub fn speed(&self) -> Speed {
        self.speed
    }

    pub fn stream(&self) -> u64 {
        self.stream
    }

    pub fn users(&self) -> &Users {
        &self.users
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Creates the in-process endpoint, replacing any previous one. The
    /// current state is readable from it right away.
    pub fn local_pipe(&mut self) -> LocalPipe {
        let session = Session::default();
        let mut initial = MemCursor::new();
        if let Err(err) = self.write_view(&mut initial, &session) {
            log::error!("initial snapshot failed: {err}");
        }
        let (pipe, end) = local_pair(initial);
        self.local = Some(Local { end, session });
        pipe
    }

    /// Creates the factory remote peers are attached through, replacing any
    /// previous one.
    pub fn pipe_factory(&mut self) -> PipeFactory {
        let (tx, rx) = bounded::<Pipe, ATTACH_QUEUE>();
        self.attach = Some(rx);
        PipeFactory::new(tx, self.config.state_ring_size, self.config.cmd_ring_size)
    }

    pub fn spawn(self) -> io::Result<SimThread<W>> {
        let running = self.running();
        let mailbox = self.local.as_ref().map(|local| Arc::clone(&local.end.mailbox));
        let handle = thread::Builder::new()
            .name("sim".to_string())
            .spawn(move || {
                let mut sim = self;
                sim.run();
                sim
            })?;
        Ok(SimThread {
            handle,
            running,
            mailbox,
        })
    }

    /// Runs the tick loop on the calling thread until `Quit` or the running
    /// flag is cleared.
    pub fn run(&mut self) {
        log::info!("sim running at {} speed", self.speed);
        self.next = Instant::now();

        while self.running.load(Ordering::SeqCst) {
            self.attach_pipes();

            let Some(period) = self.config.period(self.speed) else {
                self.drain();
                if self.dirty {
                    self.publish();
                }
                self.flush_logs();
                thread::sleep(self.config.idle_poll());
                continue;
            };

            self.world.step();
            self.drain();
            self.publish();
            self.flush_logs();
            self.pace(period);
        }

        self.shutdown();
    }

    /// Writes the world to the configured save path.
    pub fn save_world(&self) -> SaveResult<usize> {
        let mut file = SaveFile::create(&self.config.save_path, SAVE_VERSION)?;
        file.write_magic(Magic::Sim);
        file.write_u8(self.speed as u8);
        file.write_magic(Magic::Sim);
        self.world.save(&mut file);
        file.close()
    }

    /// Reads a world and its speed from the configured save path without
    /// touching the live one.
    pub fn read_save(&self) -> SaveResult<(W, Speed)> {
        let mut file = SaveFile::open(&self.config.save_path)?;
        if file.version() != SAVE_VERSION {
            return Err(SaveError::Version {
                expected: SAVE_VERSION,
                found: file.version(),
            });
        }

        file.read_magic(Magic::Sim)?;
        let raw = file.read_u8()?;
        let speed = Speed::try_from(raw).map_err(|_| SaveError::Invalid {
            what: "speed",
            value: raw as u64,
        })?;
        file.read_magic(Magic::Sim)?;

        let world = W::load(&mut file)?;
        Ok((world, speed))
    }

    fn set_speed(&mut self, speed: Speed) {
        if speed != Speed::Paused && self.speed == Speed::Paused {
            self.next = Instant::now();
        }
        self.speed = speed;
    }

    /// Sleeps until the next tick boundary. A loop that fell behind restarts
    /// its schedule from now instead of catching up.
    fn pace(&mut self, period: Duration) {
        self.next += period;
        let now = Instant::now();
        if self.next > now {
            thread::sleep(self.next - now);
            return;
        }
        let late = now - self.next;
        if !period.is_zero() && late > period {
            log::debug!("tick {} overran by {:?}", self.world.time(), late);
        }
        self.next = now;
    }

    fn attach_pipes(&mut self) {
        let Some(attach) = &mut self.attach else {
            return;
        };
        let mut fresh = Vec::new();
        while let Some(pipe) = attach.pop() {
            fresh.push(pipe);
        }

        for pipe in fresh {
            let mut remote = Remote::new(pipe);
            if let Err(err) = self.send_view(&mut remote) {
                log::error!("dropping pipe, attach snapshot failed: {err}");
                remote.pipe.close();
            }
            self.remotes.push(remote);
            log::info!("pipe attached ({} live)", self.remotes.len());
        }
    }

    fn drain(&mut self) {
        if self.local.as_ref().is_some_and(|local| local.end.detached()) {
            log::info!("local pipe detached");
            self.local = None;
        }
        while let Some(cmd) = self.local.as_mut().and_then(|local| local.end.cmds.pop()) {
            self.apply(Origin::Local, cmd);
        }

        for idx in 0..self.remotes.len() {
            self.drain_remote(idx);
        }

        let before = self.remotes.len();
        self.remotes.retain(|remote| !remote.pipe.closed());
        if self.remotes.len() != before {
            log::info!(
                "{} pipe(s) closed ({} live)",
                before - self.remotes.len(),
                self.remotes.len()
            );
        }
    }

    fn drain_remote(&mut self, idx: usize) {
        loop {
            let remote = &mut self.remotes[idx];
            if remote.pipe.closed() {
                return;
            }
            let header = match remote.pipe.recv(&mut self.payload) {
                Ok(Some(header)) => header,
                Ok(None) => return,
                Err(err) => {
                    log::error!("dropping pipe: {err}");
                    remote.pipe.close();
                    return;
                }
            };

            if header.kind != HeaderType::Cmd {
                log::warn!("unexpected {:?} frame from peer", header.kind);
                continue;
            }
            match Cmd::load(&mut self.payload) {
                Ok(cmd) => self.apply(Origin::Remote(idx), cmd),
                Err(ProtocolError::Save(err)) => {
                    self.log(Origin::Remote(idx), Status::error(format!("malformed cmd: {err}")));
                }
                Err(err) => self.log(Origin::Remote(idx), Status::error(format!("{err}"))),
            }
        }
    }

    fn session_mut(&mut self, origin: Origin) -> Option<&mut Session> {
        match origin {
            Origin::Local => self.local.as_mut().map(|local| &mut local.session),
            Origin::Remote(idx) => self.remotes.get_mut(idx).map(|remote| &mut remote.session),
        }
    }

    fn log(&mut self, origin: Origin, status: Status) {
        match origin {
            Origin::Local => match &mut self.local {
                Some(local) => local.log(status),
                None => status.log(),
            },
            Origin::Remote(idx) => match self.remotes.get_mut(idx) {
                Some(remote) => remote.log(status),
                None => status.log(),
            },
        }
    }

    fn log_all(&mut self, status: Status) {
        log::log!(status.kind.level(), "{}", status.msg());
        if let Some(local) = &mut self.local {
            local.log(status.clone());
        }
        for remote in &mut self.remotes {
            remote.log(status.clone());
        }
    }

    fn apply(&mut self, origin: Origin, cmd: Cmd) {
        let Some(session) = self.session_mut(origin) else {
            return;
        };
        if origin != Origin::Local && !cmd.is_anonymous() && session.user.is_none() {
            let msg = format!("{}: not authenticated", cmd.name());
            self.log(origin, Status::error(msg));
            return;
        }
        if !matches!(cmd, Cmd::Ack(_)) {
            self.dirty = true;
        }

        let time = self.world.time();
        match cmd {
            Cmd::Quit => {
                if origin != Origin::Local {
                    self.log(origin, Status::error("quit is only accepted locally"));
                    return;
                }
                self.log_all(Status::info("sim shutting down"));
                self.running.store(false, Ordering::SeqCst);
            }

            Cmd::Save => match self.save_world() {
                Ok(len) => {
                    let msg = format!("saved {len} bytes to {}", self.config.save_path.display());
                    self.log_all(Status::info(msg));
                }
                Err(err) => {
                    log::error!("save to {} failed: {err}", self.config.save_path.display());
                    self.log(origin, Status::error(format!("save failed: {err}")));
                }
            },

            Cmd::Load => match self.read_save() {
                Ok((world, speed)) => {
                    self.world = world;
                    self.stream = self.stream.wrapping_add(1);
                    self.set_speed(speed);
                    let time = self.world.time();
                    if let Some(local) = &mut self.local {
                        local.session.rebase(time);
                    }
                    for remote in &mut self.remotes {
                        remote.session.rebase(time);
                    }
                    let msg = format!("loaded {} at tick {time}", self.config.save_path.display());
                    self.log_all(Status::info(msg));
                }
                Err(err) => {
                    log::error!("load from {} failed: {err}", self.config.save_path.display());
                    self.log(origin, Status::error("save file is corrupted"));
                }
            },

            Cmd::User { server, name } => {
                if server != 0 && server != self.users.server() {
                    log::debug!("user '{name}' was registered with server {server:x}");
                }
                let Some(creds) = self.users.create(&name) else {
                    self.log(origin, Status::error(format!("unable to create user '{name}'")));
                    return;
                };
                if let Some(session) = self.session_mut(origin) {
                    session.user = Some(creds.id);
                }
                log::info!("created user '{name}' ({})", creds.id);

                if let Origin::Remote(idx) = origin {
                    self.scratch.clear();
                    creds.save(&mut self.scratch);
                    let sent = self.remotes[idx]
                        .pipe
                        .send(HeaderType::User, self.scratch.as_slice());
                    if !matches!(sent, Ok(true)) {
                        self.log(origin, Status::error("unable to deliver credentials"));
                    }
                }
                self.log(origin, Status::info(format!("welcome {name}")));
            }

            Cmd::Auth {
                server,
                id,
                private,
            } => {
                if !self.users.auth(server, id, private) {
                    self.log(origin, Status::error("authentication failed"));
                    return;
                }
                if let Some(session) = self.session_mut(origin) {
                    session.user = Some(id);
                }
                let name = self.users.name(id).unwrap_or_default().to_string();
                self.log(origin, Status::info(format!("welcome back {name}")));
            }

            Cmd::Ack(ack) => {
                let Some(session) = self.session_mut(origin) else {
                    return;
                };
                if ack.stream == session.ack.stream && ack.time < session.ack.time {
                    log::debug!("ignoring regressing ack {} < {}", ack.time, session.ack.time);
                    return;
                }
                session.ack = ack;
            }

            Cmd::Speed(speed) => {
                self.set_speed(speed);
                self.log_all(Status::info(format!("speed set to {speed}")));
            }

            Cmd::Chunk(coord) => {
                if let Some(session) = self.session_mut(origin) {
                    session.chunk = coord;
                }
            }

            Cmd::ModSelect(id) => {
                if self.world.mods().get(id).is_none() {
                    self.log(origin, Status::error(format!("unknown mod {id}")));
                    return;
                }
                if let Some(session) = self.session_mut(origin) {
                    session.select = Some((id, time));
                }
            }

            Cmd::ModRegister(name) => match self.world.mods_mut().register(&name) {
                Some(id) => {
                    let msg = format!("registered mod '{name}' as {}", id.maj());
                    self.log(origin, Status::info(msg));
                }
                None => {
                    let msg = format!("unable to register mod '{name}'");
                    self.log(origin, Status::error(msg));
                }
            },

            Cmd::ModCompile { maj, source } => {
                if self.world.mods().name(maj).is_none() {
                    self.log(origin, Status::error(format!("unknown mod major {maj}")));
                    return;
                }
                let module = self.compiler.compile(maj, &source);
                let msg = format!("compiled mod {maj}: {} errors", module.errors);
                if let Some(session) = self.session_mut(origin) {
                    session.compile = Some((module, time));
                }
                self.log(origin, Status::info(msg));
            }

            Cmd::ModPublish(maj) => self.publish_mod(origin, maj, time),

            Cmd::Io { io, dst, args } => {
                if args.len() > MAX_IO_ARGS {
                    let msg = format!("io: {} args, at most {MAX_IO_ARGS} allowed", args.len());
                    self.log(origin, Status::error(msg));
                    return;
                }
                let star = self
                    .session_mut(origin)
                    .map_or(Coord::NIL, |session| session.chunk);
                if star.is_nil() {
                    self.log(origin, Status::error("io: no star selected"));
                    return;
                }
                if !self.world.io(star, io, dst, &args) {
                    let msg = format!("io 0x{io:x} to {star}/{dst} failed");
                    self.log(origin, Status::error(msg));
                }
            }
        }
    }

    /// Publishes the origin's compile candidate as the next version of `maj`
    /// and selects it. The candidate stays put when it is refused.
    fn publish_mod(&mut self, origin: Origin, maj: ModMaj, time: Tick) {
        let Some(session) = self.session_mut(origin) else {
            return;
        };
        let Some((candidate, ts)) = session.compile.take() else {
            self.log(origin, Status::error("no compiled mod to publish"));
            return;
        };

        let refusal = if candidate.id.maj() != maj {
            Some(format!("compiled mod is {}, not {maj}", candidate.id.maj()))
        } else if candidate.errors != 0 {
            Some(format!("can't publish mod with {} errors", candidate.errors))
        } else {
            None
        };
        if let Some(msg) = refusal {
            session.compile = Some((candidate, ts));
            self.log(origin, Status::error(msg));
            return;
        }

        let Some(id) = self.world.mods_mut().publish(candidate) else {
            self.log(origin, Status::error(format!("unable to publish mod {maj}")));
            return;
        };
        if let Some(session) = self.session_mut(origin) {
            session.select = Some((id, time));
        }
        self.log_all(Status::info(format!("published mod {id}")));
    }

    /// Serializes the state a peer with `session` should see next, plus any
    /// undelivered mod frames.
    fn write_view(
        &mut self,
        out: &mut MemCursor,
        session: &Session,
    ) -> Result<(), ProtocolError> {
        self.scratch.clear();
        save_state(
            &mut self.scratch,
            &StateCtx {
                stream: self.stream,
                speed: self.speed,
                world: &self.world,
                chunk: session.chunk,
                ack: &session.ack,
            },
        );
        append_frame(out, HeaderType::State, self.scratch.as_slice())?;

        for frame in session.pending_mods(&self.world, self.stream) {
            self.scratch.clear();
            frame.save(&mut self.scratch);
            append_frame(out, HeaderType::Mod, self.scratch.as_slice())?;
        }
        Ok(())
    }

    /// Sends a view to one remote. Nothing is sent unless the state frame
    /// fits; the peer's ack then simply stays behind. A view larger than the
    /// ring is an error since it would never fit.
    fn send_view(&mut self, remote: &mut Remote) -> Result<(), ProtocolError> {
        self.scratch.clear();
        save_state(
            &mut self.scratch,
            &StateCtx {
                stream: self.stream,
                speed: self.speed,
                world: &self.world,
                chunk: remote.session.chunk,
                ack: &remote.session.ack,
            },
        );
        if !remote.pipe.send(HeaderType::State, self.scratch.as_slice())? {
            log::debug!("state frame of {} bytes skipped, ring full", self.scratch.len());
            return Ok(());
        }

        for frame in remote.session.pending_mods(&self.world, self.stream) {
            self.scratch.clear();
            frame.save(&mut self.scratch);
            if !remote.pipe.send(HeaderType::Mod, self.scratch.as_slice())? {
                log::debug!("mod frame {} skipped, ring full", frame.module.id);
                break;
            }
        }
        Ok(())
    }

    fn publish(&mut self) {
        self.dirty = false;

        if let Some(mut local) = self.local.take() {
            if let Some(mut buf) = local.end.buf.take() {
                buf.clear();
                if let Err(err) = self.write_view(&mut buf, &local.session) {
                    log::error!("snapshot failed: {err}");
                }
                local.end.mailbox.publish(buf);
                local.end.buf = local.end.mailbox.acquire_write();
            }
            self.local = Some(local);
        }

        let mut remotes = std::mem::take(&mut self.remotes);
        for remote in &mut remotes {
            if let Err(err) = self.send_view(remote) {
                log::error!("dropping pipe, state frame failed: {err}");
                remote.pipe.close();
            }
        }
        self.remotes = remotes;
    }

    fn flush_logs(&mut self) {
        for remote in &mut self.remotes {
            remote.flush_logs();
        }
    }

    fn shutdown(&mut self) {
        if let Some(local) = &mut self.local {
            local.end.buf = None;
            local.end.mailbox.shutdown();
        }
        self.flush_logs();
        for remote in &self.remotes {
            remote.pipe.close();
        }
        self.remotes.clear();
        log::info!("sim stopped at tick {}", self.world.time());
    }
}

/// Handle to a sim running on its own thread.
pub struct SimThread<W: World> {
    handle: JoinHandle<Sim<W>>,
    running: Arc<AtomicBool>,
    mailbox: Option<Arc<Mailbox<MemCursor>>>,
}

impl<W: World> SimThread<W> {
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Asks the loop to stop after its current iteration. Also releases it
    /// if it is waiting on the local reader for a snapshot buffer.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(mailbox) = &self.mailbox {
            mailbox.shutdown();
        }
    }

    /// Waits for the loop to exit and hands the sim back. Losing the sim
    /// thread is not recoverable, so a panic there aborts the process.
    pub fn join(self) -> Sim<W> {
        match self.handle.join() {
            Ok(sim) => sim,
            Err(_) => {
                log::error!("sim thread panicked");
                std::process::abort();
            }
        }
    }
}

pub(crate) fn rand_u64() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_nanos()),
    );
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Credentials, State, StatusType, next_frame};
    use crate::world::{IO_SET, Universe};

    fn sim() -> Sim<Universe> {
        let config = SimConfig {
            save_path: std::env::temp_dir().join(format!("legion-sim-{}.save", rand_u64())),
            ..Default::default()
        };
        Sim::new(Universe::new(0), config)
    }

    fn read_state(pipe: &LocalPipe, state: &mut State, ack: &mut Ack) -> Option<Vec<ModFrame>> {
        let mut snapshot = pipe.snapshot()?;
        snapshot.rewind();
        let mut payload = MemCursor::new();
        let mut mods = Vec::new();
        while let Some(header) = next_frame(&mut *snapshot, &mut payload).unwrap() {
            match header.kind {
                HeaderType::State => {
                    state.load(&mut payload, ack).unwrap();
                }
                HeaderType::Mod => mods.push(ModFrame::load(&mut payload).unwrap()),
                other => panic!("unexpected {other:?} in snapshot"),
            }
        }
        Some(mods)
    }

    fn step(sim: &mut Sim<Universe>) {
        sim.world.step();
        sim.drain();
        sim.publish();
    }

    #[test]
    fn commands_apply_in_order_before_publish() {
        let mut sim = sim();
        let mut pipe = sim.local_pipe();
        let home = sim.world().home();

        assert!(pipe.submit(Cmd::Chunk(home)));
        assert!(pipe.submit(Cmd::Io {
            io: IO_SET,
            dst: 1,
            args: vec![5],
        }));
        assert!(pipe.submit(Cmd::Io {
            io: IO_SET,
            dst: 1,
            args: vec![9],
        }));
        step(&mut sim);

        let mut state = State::default();
        let mut ack = Ack::default();
        read_state(&pipe, &mut state, &mut ack).unwrap();
        let chunk = state.chunk.unwrap();
        assert_eq!(chunk.coord, home);
        assert_eq!(chunk.item(1).unwrap().state, 9);
    }

    #[test]
    fn regressing_ack_is_ignored() {
        let mut sim = sim();
        let mut pipe = sim.local_pipe();
        let stream = sim.stream();

        let ack = |time| Ack {
            stream,
            time,
            ..Default::default()
        };
        pipe.submit(Cmd::Ack(ack(10)));
        pipe.submit(Cmd::Ack(ack(4)));
        sim.drain();
        assert_eq!(sim.local.as_ref().unwrap().session.ack.time, 10);

        pipe.submit(Cmd::Ack(Ack {
            stream: stream + 1,
            time: 1,
            ..Default::default()
        }));
        sim.drain();
        assert_eq!(sim.local.as_ref().unwrap().session.ack.time, 1);
    }

    #[test]
    fn publish_requires_a_clean_candidate_of_the_same_major() {
        let mut sim = sim();
        let mut pipe = sim.local_pipe();

        pipe.submit(Cmd::ModRegister("miner".to_string()));
        pipe.submit(Cmd::ModPublish(1));
        pipe.submit(Cmd::ModCompile {
            maj: 1,
            source: "(mine".to_string(),
        });
        pipe.submit(Cmd::ModPublish(1));
        sim.drain();
        assert!(sim.world().mods().get(ModId::new(1, 1)).is_none());

        pipe.submit(Cmd::ModRegister("hauler".to_string()));
        pipe.submit(Cmd::ModCompile {
            maj: 1,
            source: "(mine)".to_string(),
        });
        pipe.submit(Cmd::ModPublish(2));
        pipe.submit(Cmd::ModPublish(1));
        sim.drain();
        assert!(sim.world().mods().get(ModId::new(1, 1)).is_some());
        assert_eq!(
            sim.local.as_ref().unwrap().session.select.map(|(id, _)| id),
            Some(ModId::new(1, 1))
        );
        assert!(sim.local.as_ref().unwrap().session.compile.is_none());

        let logs: Vec<Status> = std::iter::from_fn(|| pipe.read_log()).collect();
        let errors = logs
            .iter()
            .filter(|status| status.kind == crate::protocol::StatusType::Error)
            .count();
        assert_eq!(errors, 3);
    }

    #[test]
    fn mod_frames_repeat_until_acked() {
        let mut sim = sim();
        let mut pipe = sim.local_pipe();
        let mut state = State::default();
        let mut ack = Ack::default();
        read_state(&pipe, &mut state, &mut ack).unwrap();

        pipe.submit(Cmd::ModRegister("probe".to_string()));
        pipe.submit(Cmd::ModCompile {
            maj: 1,
            source: "(scan)".to_string(),
        });
        step(&mut sim);
        let mods = read_state(&pipe, &mut state, &mut ack).unwrap();
        assert_eq!(mods.len(), 1);
        assert_eq!(mods[0].kind, ModKind::Compile);

        step(&mut sim);
        assert_eq!(read_state(&pipe, &mut state, &mut ack).unwrap().len(), 1);

        pipe.submit(Cmd::Ack(ack));
        step(&mut sim);
        assert!(read_state(&pipe, &mut state, &mut ack).unwrap().is_empty());
    }

    #[test]
    fn save_then_load_bumps_the_stream() {
        let mut sim = sim();
        let mut pipe = sim.local_pipe();
        for _ in 0..5 {
            sim.world.step();
        }
        pipe.submit(Cmd::Speed(Speed::Fast));
        pipe.submit(Cmd::Save);
        sim.drain();

        for _ in 0..5 {
            sim.world.step();
        }
        pipe.submit(Cmd::Speed(Speed::Paused));
        let stream = sim.stream();
        pipe.submit(Cmd::Load);
        sim.drain();

        assert_eq!(sim.world().time(), 5);
        assert_eq!(sim.speed(), Speed::Fast);
        assert_eq!(sim.stream(), stream + 1);
        let _ = std::fs::remove_file(&sim.config.save_path);
    }

    #[test]
    fn remote_cmds_need_auth() {
        let mut sim = sim();
        let mut factory = sim.pipe_factory();
        let mut peer = factory.open().unwrap();
        sim.attach_pipes();

        let mut payload = MemCursor::new();
        assert_eq!(
            peer.recv(&mut payload).unwrap().map(|header| header.kind),
            Some(HeaderType::State)
        );

        fn send(peer: &mut Pipe, cmd: Cmd) {
            let mut buf = MemCursor::new();
            cmd.save(&mut buf).unwrap();
            assert!(peer.send(HeaderType::Cmd, buf.as_slice()).unwrap());
        }
        send(&mut peer, Cmd::Speed(Speed::Fast));
        sim.drain();
        assert_eq!(sim.speed(), Speed::Paused);

        send(
            &mut peer,
            Cmd::User {
                server: 0,
                name: "ada".to_string(),
            },
        );
        send(&mut peer, Cmd::Speed(Speed::Fast));
        sim.drain();
        assert_eq!(sim.speed(), Speed::Fast);

        let header = peer.recv(&mut payload).unwrap().unwrap();
        assert_eq!(header.kind, HeaderType::User);
        let creds = Credentials::load(&mut payload).unwrap();
        assert_eq!(creds.server, sim.users().server());
    }

    #[test]
    fn io_with_too_many_args_is_rejected() {
        let mut sim = sim();
        let mut pipe = sim.local_pipe();
        let home = sim.world().home();

        assert!(pipe.submit(Cmd::Chunk(home)));
        assert!(pipe.submit(Cmd::Io {
            io: IO_SET,
            dst: 1,
            args: vec![5; MAX_IO_ARGS + 2],
        }));
        sim.drain();
        sim.publish();

        let mut state = State::default();
        let mut ack = Ack::default();
        read_state(&pipe, &mut state, &mut ack).unwrap();
        assert_eq!(state.chunk.unwrap().item(1).unwrap().state, 0);
        let logs: Vec<Status> = std::iter::from_fn(|| pipe.read_log()).collect();
        assert!(
            logs.iter()
                .any(|status| status.kind == StatusType::Error && status.msg().starts_with("io:"))
        );
    }

    #[test]
    fn speed_change_shows_before_the_next_tick() {
        let mut sim = sim();
        let mut pipe = sim.local_pipe();
        let mut state = State::default();
        let mut ack = Ack::default();
        read_state(&pipe, &mut state, &mut ack).unwrap();
        assert_eq!(state.speed, Speed::Paused);
        let time = state.time;

        // One paused iteration: cmds are drained and the dirty view published
        // without stepping the world.
        assert!(pipe.submit(Cmd::Speed(Speed::Slow)));
        sim.drain();
        assert!(sim.dirty);
        sim.publish();
        read_state(&pipe, &mut state, &mut ack).unwrap();
        assert_eq!((state.speed, state.time), (Speed::Slow, time));

        step(&mut sim);
        read_state(&pipe, &mut state, &mut ack).unwrap();
        assert_eq!((state.speed, state.time), (Speed::Slow, time + 1));
    }

    #[test]
    fn view_larger_than_the_ring_drops_the_pipe() {
        let config = SimConfig {
            state_ring_size: 64,
            ..Default::default()
        };
        let mut sim = Sim::new(Universe::new(0), config);
        let mut factory = sim.pipe_factory();
        let peer = factory.open().unwrap();
        sim.attach_pipes();
        assert!(peer.closed());

        sim.drain();
        assert!(sim.remotes.is_empty());
    }

    #[test]
    fn bad_magic_closes_the_pipe() {
        let mut sim = sim();
        let mut factory = sim.pipe_factory();
        let mut peer = factory.open().unwrap();
        sim.attach_pipes();

        let (tx, _) = peer.rings_mut();
        let mut cursor = tx.write();
        cursor.write(&[0x55; 16]);
        cursor.commit();

        sim.drain();
        assert!(peer.closed());
        assert!(sim.remotes.is_empty());
    }
}
