use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use legion::{
    Cmd, Proxy, ProxyLink, Sim, SimConfig, Speed, StatusType, Universe, Update, World,
};

static SAVE_COUNTER: AtomicU32 = AtomicU32::new(0);

fn save_path() -> PathBuf {
    let n = SAVE_COUNTER.fetch_add(1, Ordering::SeqCst);
    std::env::temp_dir().join(format!("legion-it-{}-{n}.save", std::process::id()))
}

fn config() -> SimConfig {
    SimConfig {
        save_path: save_path(),
        slow_ms: 20,
        idle_poll_ms: 1,
        ..Default::default()
    }
}

fn update_until(proxy: &mut Proxy, timeout_ms: u64, mut done: impl FnMut(&Proxy) -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        proxy.update();
        if done(proxy) {
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn paused_sim_starts_ticking_on_speed_cmd() {
    let mut sim = Sim::new(Universe::new(1), config());
    let mut proxy = Proxy::new("");
    proxy.attach(ProxyLink::Local(sim.local_pipe()));

    assert_eq!(proxy.update(), Update::Reset);
    assert_eq!(proxy.state().time, 0);
    assert_eq!(proxy.state().speed, Speed::Paused);

    let sim = sim.spawn().unwrap();
    assert!(proxy.submit(Cmd::Speed(Speed::Slow)));

    assert!(update_until(&mut proxy, 2000, |proxy| proxy.state().time >= 1));
    assert_eq!(proxy.state().speed, Speed::Slow);
    let stream = proxy.ack().stream;
    assert_eq!(stream, proxy.state().stream);

    sim.stop();
    let sim = sim.join();
    assert!(sim.world().time() >= proxy.state().time);
}

#[test]
fn corrupted_save_keeps_the_world() {
    let config = config();
    std::fs::write(&config.save_path, b"definitely not a save").unwrap();

    let mut sim = Sim::new(Universe::new(2), config.clone());
    let mut proxy = Proxy::new("");
    proxy.attach(ProxyLink::Local(sim.local_pipe()));
    proxy.update();
    let stream = proxy.state().stream;
    let seed = proxy.state().seed;

    let sim = sim.spawn().unwrap();
    assert!(proxy.submit(Cmd::Load));
    assert!(update_until(&mut proxy, 2000, |proxy| {
        proxy.logs().any(|status| status.kind == StatusType::Error)
    }));
    let status = proxy
        .logs()
        .find(|status| status.kind == StatusType::Error)
        .unwrap();
    assert_eq!(status.msg(), "save file is corrupted");
    assert_eq!(proxy.state().stream, stream);
    assert_eq!(proxy.state().seed, seed);

    sim.stop();
    sim.join();
    let _ = std::fs::remove_file(&config.save_path);
}

#[test]
fn save_and_load_round_trip_through_a_running_sim() {
    let config = config();
    let mut sim = Sim::new(Universe::new(3), config.clone()).with_speed(Speed::Fastest);
    let mut proxy = Proxy::new("");
    proxy.attach(ProxyLink::Local(sim.local_pipe()));
    proxy.update();
    let stream = proxy.state().stream;

    let sim = sim.spawn().unwrap();
    assert!(proxy.submit(Cmd::Speed(Speed::Paused)));
    assert!(update_until(&mut proxy, 2000, |proxy| proxy.state().speed == Speed::Paused));
    assert!(proxy.submit(Cmd::Save));
    assert!(update_until(&mut proxy, 2000, |proxy| {
        proxy.logs().any(|status| status.msg().starts_with("saved"))
    }));
    let saved = proxy.state().time;

    assert!(proxy.submit(Cmd::Load));
    assert!(update_until(&mut proxy, 2000, |proxy| proxy.state().stream != stream));
    assert_eq!(proxy.state().time, saved);
    assert_eq!(proxy.state().speed, Speed::Paused);

    sim.stop();
    sim.join();
    let _ = std::fs::remove_file(&config.save_path);
}

#[test]
fn local_quit_stops_the_sim() {
    let mut sim = Sim::new(Universe::new(4), config());
    let mut proxy = Proxy::new("");
    proxy.attach(ProxyLink::Local(sim.local_pipe()));

    let sim = sim.spawn().unwrap();
    assert!(proxy.submit(Cmd::Quit));

    let start = Instant::now();
    while !sim.is_finished() && start.elapsed() < Duration::from_secs(2) {
        thread::sleep(Duration::from_millis(2));
    }
    assert!(sim.is_finished());
    sim.join();

    proxy.update();
    assert!(!proxy.is_attached());
}

#[test]
fn cmd_queue_is_bounded() {
    let mut sim = Sim::new(Universe::new(5), config());
    let mut proxy = Proxy::new("");
    proxy.attach(ProxyLink::Local(sim.local_pipe()));

    for _ in 0..legion::sim::CMD_QUEUE {
        assert!(proxy.submit(Cmd::Speed(Speed::Slow)));
    }
    assert!(!proxy.submit(Cmd::Speed(Speed::Fast)));
}
