use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinSet;

use crate::sim::PipeFactory;

use super::Link;

const DEFAULT_POLL: Duration = Duration::from_millis(100);

/// Accepts TCP peers and gives each one a pipe into the sim.
pub struct Server {
    listener: TcpListener,
    factory: PipeFactory,
    running: Arc<AtomicBool>,
    poll: Duration,
    live: watch::Sender<usize>,
}

impl Server {
    /// `running` is the sim's flag; the server winds down once it clears.
    pub async fn bind(
        addr: impl ToSocketAddrs,
        factory: PipeFactory,
        running: Arc<AtomicBool>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            factory,
            running,
            poll: DEFAULT_POLL,
            live: watch::Sender::new(0),
        })
    }

    /// How often idle links and the sim's running flag are checked.
    pub fn with_poll(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Number of links currently being served.
    pub fn links(&self) -> watch::Receiver<usize> {
        self.live.subscribe()
    }

    /// Serves until `shutdown` fires or the sim stops, then closes every link
    /// and waits for their tasks.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut links = JoinSet::new();
        let mut check = tokio::time::interval(self.poll);

        match self.local_addr() {
            Ok(addr) => log::info!("listening on {addr}"),
            Err(err) => log::warn!("listening on unknown address: {err}"),
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => self.open_link(stream, addr, &mut links, &stop_rx),
                        Err(err) => log::warn!("accept failed: {err}"),
                    }
                    self.accept_pending(&mut links, &stop_rx);
                }
                Some(joined) = links.join_next() => {
                    if let Err(err) = joined {
                        log::error!("link task failed: {err}");
                    }
                    self.live.send_replace(links.len());
                }
                _ = shutdown.changed() => {
                    log::info!("server shutting down");
                    break;
                }
                _ = check.tick() => {
                    if !self.running.load(Ordering::SeqCst) {
                        log::info!("sim stopped, closing server");
                        break;
                    }
                }
            }
        }

        stop_tx.send_replace(true);
        let open = links.len();
        while let Some(joined) = links.join_next().await {
            if let Err(err) = joined {
                log::error!("link task failed: {err}");
            }
        }
        self.live.send_replace(0);
        log::info!("closed {open} links");
    }

    /// Takes every connection already queued on the listener.
    fn accept_pending(&mut self, links: &mut JoinSet<()>, stop: &watch::Receiver<bool>) {
        let mut cx = Context::from_waker(Waker::noop());
        loop {
            match self.listener.poll_accept(&mut cx) {
                Poll::Ready(Ok((stream, addr))) => self.open_link(stream, addr, links, stop),
                Poll::Ready(Err(ref e)) if e.kind() == io::ErrorKind::WouldBlock => break,
                Poll::Ready(Err(err)) => {
                    log::warn!("accept failed: {err}");
                    break;
                }
                Poll::Pending => break,
            }
        }
    }

    fn open_link(
        &mut self,
        stream: TcpStream,
        addr: SocketAddr,
        links: &mut JoinSet<()>,
        stop: &watch::Receiver<bool>,
    ) {
        let Some(pipe) = self.factory.open() else {
            log::warn!("{addr}: sim has too many pipes waiting to attach, dropping");
            return;
        };
        let link = match Link::new(stream, pipe) {
            Ok(link) => link,
            Err(err) => {
                log::warn!("{addr}: unable to set up link: {err}");
                return;
            }
        };
        links.spawn(serve(link, stop.clone(), self.poll));
        self.live.send_replace(links.len());
    }
}

async fn serve(mut link: Link, mut stop: watch::Receiver<bool>, poll: Duration) {
    let peer = link.peer();
    log::info!("{peer}: connected");

    loop {
        let events = tokio::select! {
            events = link.wait(poll) => events,
            _ = stop.changed() => break,
        };
        if let Err(err) = link.on_events(events) {
            log::info!("{peer}: disconnected ({err})");
            break;
        }
    }

    link.finish();
}
