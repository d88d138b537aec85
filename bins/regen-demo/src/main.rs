// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! regen-demo
//!
//! Headless driver for the regen runtime core. Loads the scheduler
//! configuration, registers a handful of demo tasks and drives a fake render
//! loop, logging per-frame statistics.
#![forbid(unsafe_code)]

mod render;
mod scene;

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use regen_config::{ConfigService, FsConfigStore};
use regen_sched::{Scheduler, SchedulerConfig, SCHEDULER_CONFIG_KEY};
use tracing::info;
use tracing_subscriber::EnvFilter;

use render::RenderContext;
use scene::{Camera, Sensor, Spinner};

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive the regen scheduler against a fake render context")]
struct Args {
    /// Number of frames to render
    #[arg(long, default_value_t = 120)]
    frames: u64,
    /// Simulated render time per frame, in milliseconds
    #[arg(long, default_value_t = 16)]
    frame_ms: u64,
    /// Read and write config files here instead of the platform config dir
    #[arg(long)]
    config_dir: Option<PathBuf>,
    /// Let the logic worker free-run instead of stepping in lock-step with frames
    #[arg(long)]
    free_running: bool,
}

fn load_config(args: &Args) -> Result<SchedulerConfig> {
    let store = match &args.config_dir {
        Some(dir) => FsConfigStore::at(dir)
            .with_context(|| format!("open config dir {}", dir.display()))?,
        None => FsConfigStore::new().context("open platform config dir")?,
    };
    info!(dir = %store.base().display(), "config store");
    let service = ConfigService::new(store);
    let mut config: SchedulerConfig = service
        .load_or_init(SCHEDULER_CONFIG_KEY)
        .context("load scheduler config")?;
    if args.free_running {
        config.lock_step = false;
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let config = load_config(&args)?;
    info!(?config, frames = args.frames, "starting regen demo");

    let scheduler = Arc::new(Scheduler::spawn(config).context("spawn scheduler")?);
    let spinner = Spinner::new(90.0);
    let camera = Camera::new(&scheduler, args.frames / 2);
    let sensor = Sensor::new(30.0);
    scheduler.register_task(spinner.clone())?;
    scheduler.register_task(camera.clone())?;
    scheduler.register_task(sensor.clone())?;

    let mut ctx = RenderContext::new();
    let frame_time = Duration::from_millis(args.frame_ms);
    scheduler.resume();

    let mut last = Instant::now();
    for frame in 0..args.frames {
        let now = Instant::now();
        let dt = now.duration_since(last).as_secs_f64() * 1000.0;
        last = now;

        scheduler.drive_frame(&mut ctx, dt);
        thread::sleep(frame_time);

        if frame % 30 == 29 {
            info!(
                frame = frame + 1,
                steps = scheduler.step_count(),
                render_tasks = scheduler.render_task_count(),
                draws = ctx.draws,
                transitions = ctx.transitions(),
                angle = spinner.angle(),
                "frame stats"
            );
        }
    }

    scheduler.pause(true);
    scheduler.close(true).context("close scheduler")?;
    info!(
        frames = scheduler.frame_count(),
        steps = scheduler.step_count(),
        draws = ctx.draws,
        transitions = ctx.transitions(),
        particles = camera.particles_spawned(),
        sensor_samples = sensor.samples(),
        "demo finished"
    );
    Ok(())
}
