use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};

use crate::protocol::Cmd;
use crate::proxy::{Proxy, ProxyLink, Update};
use crate::sim::{Pipe, SimConfig};

use super::{Backoff, Link, LinkError};

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub addr: String,
    /// One backoff unit; the wait between reconnects is a multiple of it.
    pub backoff_unit: Duration,
    /// Upper bound on how long the link sleeps without any event.
    pub poll: Duration,
    pub state_ring_size: usize,
    pub cmd_ring_size: usize,
}

impl Default for ClientOptions {
    fn default() -> Self {
        let sim = SimConfig::default();
        Self {
            addr: "127.0.0.1:18181".to_string(),
            backoff_unit: Duration::from_secs(1),
            poll: Duration::from_millis(100),
            state_ring_size: sim.state_ring_size,
            cmd_ring_size: sim.cmd_ring_size,
        }
    }
}

enum Teardown {
    Lost,
    Exit,
}

/// Keeps a proxy connected to a remote sim, reconnecting with backoff.
pub struct Client {
    options: ClientOptions,
    backoff: Backoff,
    proxy: Proxy,
}

impl Client {
    pub fn new(options: ClientOptions, proxy: Proxy) -> Self {
        Self {
            options,
            backoff: Backoff::new(),
            proxy,
        }
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    /// Runs until `shutdown` fires or `cmds` closes and hands the proxy back.
    /// `on_update` sees the proxy after every update that changed the mirror.
    pub async fn run<F>(
        mut self,
        mut cmds: mpsc::Receiver<Cmd>,
        mut shutdown: watch::Receiver<bool>,
        mut on_update: F,
    ) -> Proxy
    where
        F: FnMut(&Proxy, Update),
    {
        loop {
            let connected = tokio::select! {
                connected = TcpStream::connect(&self.options.addr) => connected,
                _ = shutdown.changed() => break,
            };

            let result = match connected {
                Ok(stream) => {
                    self.backoff.reset();
                    self.session(stream, &mut cmds, &mut shutdown, &mut on_update)
                        .await
                }
                Err(err) => Err(LinkError::Io(err)),
            };

            match result {
                Ok(Teardown::Exit) => break,
                Ok(Teardown::Lost) => {}
                Err(err) => log::warn!("unable to connect to {}: {err}", self.options.addr),
            }

            let delay = self.backoff.delay(self.options.backoff_unit);
            log::info!("reconnecting to {} in {delay:?}", self.options.addr);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.proxy
    }

    async fn session<F>(
        &mut self,
        stream: TcpStream,
        cmds: &mut mpsc::Receiver<Cmd>,
        shutdown: &mut watch::Receiver<bool>,
        on_update: &mut F,
    ) -> Result<Teardown, LinkError>
    where
        F: FnMut(&Proxy, Update),
    {
        let (near, far) = Pipe::pair(self.options.state_ring_size, self.options.cmd_ring_size);
        let mut link = Link::new(stream, near)?;
        log::info!("connected to {}", link.peer());
        self.proxy.attach(ProxyLink::Remote(far));

        let teardown = loop {
            let events = tokio::select! {
                events = link.wait(self.options.poll) => events,
                cmd = cmds.recv() => match cmd {
                    Some(cmd) => {
                        self.proxy.submit(cmd);
                        Default::default()
                    }
                    None => break Teardown::Exit,
                },
                _ = shutdown.changed() => break Teardown::Exit,
            };

            let result = link.on_events(events);
            let update = self.proxy.update();
            if update != Update::Nil {
                on_update(&self.proxy, update);
            }
            if let Err(err) = result {
                log::warn!("connection to {} lost: {err}", link.peer());
                break Teardown::Lost;
            }
            if !self.proxy.is_attached() {
                log::warn!("link to {} closed by the proxy", link.peer());
                break Teardown::Lost;
            }
        };

        if matches!(teardown, Teardown::Exit) {
            // Flush queued cmds and acks before hanging up.
            if let Err(err) = link.on_events(Default::default()) {
                log::debug!("{}: flush before hangup failed: {err}", link.peer());
            }
        }
        link.finish();
        self.proxy.detach();
        Ok(teardown)
    }
}
