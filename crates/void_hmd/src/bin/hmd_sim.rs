//! HMD client simulator
//!
//! Runs the full client stack against the scripted mock runtime: startup
//! events, a number of frames, then the runtime-initiated shutdown.
//!
//! Run with: cargo run -p void_hmd --bin hmd_sim -- [config.toml] [--frames N]

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Quat, Vec3};

use void_hmd::prelude::*;

const DEFAULT_FRAMES: u64 = 90;

struct SimAnchor {
    name: String,
    parent: Option<AnchorId>,
    visible: bool,
    position: Vec3,
    orientation: Quat,
}

/// Minimal scene graph standing in for a host engine
#[derive(Default)]
struct SimHost {
    anchors: HashMap<AnchorId, SimAnchor>,
    next_id: u64,
    cameras: HashMap<usize, (Mat4, Vec3)>,
    exit: Option<ExitReason>,
}

impl PoseSink for SimHost {
    fn update_pose(&mut self, anchor: AnchorId, position: Vec3, orientation: Quat) {
        if let Some(node) = self.anchors.get_mut(&anchor) {
            node.visible = true;
            node.position = position;
            node.orientation = orientation;
        }
    }

    fn hide(&mut self, anchor: AnchorId) {
        if let Some(node) = self.anchors.get_mut(&anchor) {
            node.visible = false;
        }
    }
}

impl HostEngine for SimHost {
    fn create_anchor(&mut self, name: &str, parent: Option<AnchorId>) -> AnchorId {
        let id = AnchorId(self.next_id);
        self.next_id += 1;
        self.anchors.insert(
            id,
            SimAnchor {
                name: name.to_string(),
                parent,
                visible: false,
                position: Vec3::ZERO,
                orientation: Quat::IDENTITY,
            },
        );
        id
    }

    fn set_camera(&mut self, view_index: usize, projection: Mat4, position: Vec3, _orientation: Quat) {
        self.cameras.insert(view_index, (projection, position));
    }

    fn request_exit(&mut self, reason: ExitReason) {
        self.exit = Some(reason);
    }
}

struct Args {
    config_path: Option<String>,
    frames: u64,
}

fn parse_args() -> Args {
    let mut args = Args {
        config_path: None,
        frames: DEFAULT_FRAMES,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--frames" {
            match iter.next().map(|n| n.parse::<u64>()) {
                Some(Ok(n)) => args.frames = n,
                _ => log::warn!("--frames expects a number, using {}", args.frames),
            }
        } else if arg.starts_with("--") {
            log::warn!("Unknown flag {}", arg);
        } else if args.config_path.is_none() {
            args.config_path = Some(arg);
        }
    }
    args
}

fn load_config(path: Option<&str>) -> HmdResult<HmdConfig> {
    let mut config = match path {
        Some(path) => HmdConfig::load(path)?,
        None => HmdConfig::default(),
    };
    config.apply_env_overrides()?;
    Ok(config)
}

fn run(args: &Args) -> HmdResult<()> {
    let config = load_config(args.config_path.as_deref())?;
    let mock = Arc::new(MockRuntime::default());
    let runtime: SharedRuntime = mock.clone();
    let mut host = SimHost::default();

    let mut driver = HmdDriver::new(runtime, config, GraphicsBinding::headless(), &mut host)?;
    let session = driver.session().handle();
    mock.push_startup(session);

    let mut drawn = 0u64;
    for frame in 0..args.frames {
        if frame + 1 == args.frames {
            mock.push_shutdown(session);
        }
        if let SessionControl::Exit(reason) = driver.run_frame(&mut host, |_| drawn += 1)? {
            log::info!("Leaving frame loop: {:?}", reason);
            break;
        }
    }
    if host.exit.is_none() {
        mock.push_shutdown(session);
        driver.poll_events(&mut host)?;
    }

    let submissions = mock.submissions();
    let with_layer = submissions.iter().filter(|s| !s.layers.is_empty()).count();

    println!();
    println!("Frames ended:       {}", driver.frame_count());
    println!("Frames with layer:  {}", with_layer);
    println!("Views drawn:        {}", drawn);
    println!("Session state:      {:?}", driver.session().state());
    println!("Exit reason:        {:?}", host.exit);
    let mut cameras: Vec<_> = host.cameras.iter().collect();
    cameras.sort_by_key(|(index, _)| **index);
    for (index, (_, position)) in cameras {
        println!("Camera {}:           {:?}", index, position);
    }
    let mut anchors: Vec<_> = host.anchors.iter().collect();
    anchors.sort_by_key(|(id, _)| id.0);
    for (_, anchor) in anchors {
        println!(
            "Anchor {:<18} parent {:?} visible {} at {:?} {:?}",
            anchor.name, anchor.parent, anchor.visible, anchor.position, anchor.orientation
        );
    }

    drop(driver);
    println!("Live runtime objects after teardown: {}", mock.live_objects());
    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = parse_args();
    if let Err(e) = run(&args) {
        log::error!("HMD simulation failed: {}", e);
        std::process::exit(1);
    }
}
