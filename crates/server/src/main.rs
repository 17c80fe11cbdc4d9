mod config;

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;

use config::ServerConfig;
use legion::{Server, Sim, Speed, Universe, World};

#[derive(Parser)]
#[command(name = "legion-server")]
#[command(about = "Legion sim server")]
struct Args {
    #[arg(short, long, help = "Config file (toml)")]
    config: Option<PathBuf>,

    #[arg(short, long)]
    bind: Option<String>,

    #[arg(short, long)]
    port: Option<u16>,

    #[arg(long, help = "Seed for a fresh universe")]
    seed: Option<u64>,

    #[arg(long, help = "Initial speed: paused, slow, fast, faster or fastest")]
    speed: Option<Speed>,

    #[arg(long, help = "Save file path")]
    save: Option<PathBuf>,

    #[arg(long, help = "Start from the save file instead of a fresh universe")]
    load: bool,

    #[arg(long, help = "Save the world on shutdown")]
    save_on_exit: bool,
}

impl Args {
    fn apply(&self, config: &mut ServerConfig) {
        if let Some(bind) = &self.bind {
            config.bind = bind.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if let Some(speed) = self.speed {
            config.speed = speed;
        }
        if let Some(save) = &self.save {
            config.sim.save_path = save.clone();
        }
        config.save_on_exit |= self.save_on_exit;
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    args.apply(&mut config);

    let mut sim = Sim::new(Universe::new(config.seed), config.sim.clone()).with_speed(config.speed);
    if args.load {
        let (world, speed) = sim.read_save()?;
        log::info!(
            "loaded {} at tick {}",
            config.sim.save_path.display(),
            world.time()
        );
        sim = Sim::new(world, config.sim.clone()).with_speed(speed);
    }

    let factory = sim.pipe_factory();
    let running = sim.running();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let server = rt
        .block_on(Server::bind(
            (config.bind.as_str(), config.port),
            factory,
            running,
        ))?
        .with_poll(config.poll());

    let sim = sim.spawn()?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    rt.block_on(async move {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("interrupted");
                shutdown_tx.send_replace(true);
            }
        });
        server.run(shutdown_rx).await;
    });

    sim.stop();
    let sim = sim.join();
    if config.save_on_exit {
        let len = sim.save_world()?;
        log::info!("saved {len} bytes to {}", config.sim.save_path.display());
    }

    Ok(())
}
