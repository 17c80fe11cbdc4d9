mod commands;
mod config;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};

use commands::{HELP, Line};
use config::ClientConfig;
use legion::{Client, Cmd, Proxy, ProxyLink, Sim, Universe, Update};

#[derive(Parser)]
#[command(name = "legion-client")]
#[command(about = "Legion client")]
struct Args {
    #[arg(short, long, help = "Config file (toml); credentials are stored back into it")]
    config: Option<PathBuf>,

    #[arg(short, long, help = "Server address to connect to (e.g., 127.0.0.1:18181)")]
    server: Option<String>,

    #[arg(short, long, help = "User name to register with")]
    name: Option<String>,

    #[arg(long, help = "Run the sim in-process instead of connecting")]
    local: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) if path.exists() => ClientConfig::load(path)?,
        _ => ClientConfig::default(),
    };
    if let Some(server) = args.server {
        config.server = server;
    }
    if let Some(name) = args.name {
        config.name = name;
    }

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    rt.block_on(async {
        let lines = read_lines();
        if args.local {
            run_local(&config, lines).await
        } else {
            run_remote(config, args.config, lines).await
        }
    })
}

/// Parsed stdin lines. Parse errors are reported right away and skipped.
fn read_lines() -> mpsc::Receiver<Line> {
    let (tx, rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match commands::parse(&line) {
                Ok(Line::Empty) => {}
                Ok(Line::Help) => println!("{HELP}"),
                Ok(line) => {
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(err) => eprintln!("{err}"),
            }
        }
    });
    rx
}

async fn run_local(config: &ClientConfig, mut lines: mpsc::Receiver<Line>) -> Result<()> {
    let mut sim = Sim::new(Universe::new(config.seed), config.sim.clone());
    let mut proxy = Proxy::new(config.name.clone());
    proxy.attach(ProxyLink::Local(sim.local_pipe()));
    let sim = sim.spawn()?;
    log::info!("running a local sim");

    let mut tick = tokio::time::interval(Duration::from_millis(config.poll_ms.clamp(1, 100)));
    while proxy.is_attached() {
        tokio::select! {
            line = lines.recv() => match line {
                Some(Line::Cmd(cmd)) => {
                    proxy.submit(cmd);
                }
                Some(Line::Status) => print_status(&proxy),
                Some(Line::Exit) | None => {
                    proxy.submit(Cmd::Quit);
                    break;
                }
                Some(Line::Help | Line::Empty) => {}
            },
            _ = tick.tick() => {
                if proxy.update() == Update::Reset {
                    print_status(&proxy);
                }
            }
        }
    }

    sim.stop();
    let sim = sim.join();
    log::info!("local sim stopped with {} users", sim.users().len());
    Ok(())
}

async fn run_remote(
    config: ClientConfig,
    path: Option<PathBuf>,
    mut lines: mpsc::Receiver<Line>,
) -> Result<()> {
    let proxy = Proxy::new(config.name.clone()).with_credentials(config.credentials());
    let client = Client::new(config.options(), proxy);
    let (cmd_tx, cmd_rx) = mpsc::channel::<Cmd>(16);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (status_tx, mut status_rx) = watch::channel(false);

    let mut stored = config.credentials();
    let mut config = config;
    let on_update = move |proxy: &Proxy, update: Update| {
        if update == Update::Reset {
            print_status(proxy);
        }
        if proxy.credentials() != stored {
            stored = proxy.credentials();
            if let (Some(path), Some(creds)) = (&path, stored) {
                config.credentials = Some(creds.into());
                match config.store(path) {
                    Ok(()) => log::info!("credentials stored in {}", path.display()),
                    Err(err) => log::error!("unable to store credentials: {err:#}"),
                }
            }
        }
        if status_rx.has_changed().unwrap_or(false) {
            status_rx.mark_unchanged();
            print_status(proxy);
        }
    };

    let input = async move {
        while let Some(line) = lines.recv().await {
            match line {
                Line::Cmd(cmd) => {
                    if cmd_tx.send(cmd).await.is_err() {
                        break;
                    }
                }
                Line::Status => {
                    status_tx.send_replace(true);
                }
                Line::Exit => break,
                Line::Help | Line::Empty => {}
            }
        }
        shutdown_tx.send_replace(true);
    };

    let (proxy, ()) = tokio::join!(client.run(cmd_rx, shutdown_rx, on_update), input);
    log::info!("disconnected at tick {}", proxy.state().time);
    Ok(())
}

fn print_status(proxy: &Proxy) {
    let state = proxy.state();
    println!(
        "stream {:x} tick {} speed {} home {} stars {} atoms {} mods {}",
        state.stream,
        state.time,
        state.speed,
        state.home,
        state.chunks.len(),
        state.atoms.len(),
        state.mods.len(),
    );
    if let Some(module) = proxy.selected_mod() {
        println!("selected mod {}", module.id);
    }
    if let Some(module) = proxy.compiled_mod() {
        println!("compiled mod {} with {} errors", module.id, module.errors);
    }
}
