//! Thin binary entry point: load a JSON scene, run it to completion, and
//! log the resulting per-node statistics. CSV export, a GUI, and full CLI
//! argument parsing are out of scope for the core simulator; this exists
//! only because every runnable crate in the corpus ships a binary that
//! drives its library the same way.

use std::path::PathBuf;
use std::{fs, process};

use env_logger::Builder;
use log::{error, info, LevelFilter};

use wlan_dess::runtime::QueueKind;
use wlan_dess::simulation::config::Scene;
use wlan_dess::simulation::run_scene;

fn scene_path() -> PathBuf {
    std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| PathBuf::from("scene.json"))
}

fn load_scene(path: &PathBuf) -> anyhow::Result<Scene> {
    let raw = fs::read_to_string(path)?;
    let scene: Scene = serde_json::from_str(&raw)?;
    scene.validate()?;
    Ok(scene)
}

fn main() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .filter(Some("wlan_dess"), LevelFilter::Debug)
        .init();

    let path = scene_path();
    info!("loading scene from {}", path.display());

    let scene = match load_scene(&path) {
        Ok(scene) => scene,
        Err(err) => {
            error!("failed to load scene: {err:#}");
            process::exit(1);
        }
    };

    info!("running {} nodes for {:.3}s (seed={})", scene.nodes.len(), scene.sim_time_secs, scene.seed);
    let report = run_scene(&scene, QueueKind::Calendar);
    report.log_summary();
}
