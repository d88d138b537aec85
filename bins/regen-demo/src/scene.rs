// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Demo tasks: a spinning transform, an orbiting camera that spawns a
//! particle system mid-run, and a sensor polled at its own rate.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use regen_sched::{Scheduler, Task, TaskCore};
use tracing::{debug, info, trace, warn};

use crate::render::{BlendMode, ColorMask, RenderContext, DRAW_BUFFERS};

type DemoScheduler = Scheduler<RenderContext>;

/// Rotates at a fixed angular speed.
pub struct Spinner {
    core: TaskCore,
    degrees_per_sec: f64,
    angle: Mutex<f64>,
}

impl Spinner {
    pub fn new(degrees_per_sec: f64) -> Arc<Self> {
        Arc::new(Self {
            core: TaskCore::builder("spinner").logic().render().running().build(),
            degrees_per_sec,
            angle: Mutex::new(0.0),
        })
    }

    pub fn angle(&self) -> f64 {
        *self.angle.lock()
    }
}

impl Task<RenderContext> for Spinner {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn logic_update(&self, dt: f64) {
        let mut angle = self.angle.lock();
        *angle = (*angle + self.degrees_per_sec * dt / 1000.0) % 360.0;
    }

    fn render_update(&self, ctx: &mut RenderContext, _dt: f64) {
        let angle = self.angle();
        ctx.blend.push(BlendMode::Opaque);
        ctx.draws += 1;
        ctx.blend.pop();
        trace!(angle, "spinner drawn");
    }
}

/// Point sprites blended additively on top of the scene.
pub struct Particles {
    core: TaskCore,
    positions: Mutex<Vec<f32>>,
}

impl Particles {
    fn new(count: usize) -> Arc<Self> {
        Arc::new(Self {
            core: TaskCore::builder("particles")
                .logic()
                .render()
                .running()
                .build(),
            positions: Mutex::new(vec![0.0; count]),
        })
    }
}

impl Task<RenderContext> for Particles {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
    fn logic_update(&self, dt: f64) {
        let step = (dt / 1000.0) as f32;
        for (i, y) in self.positions.lock().iter_mut().enumerate() {
            let speed = 0.5 + (i % 7) as f32 * 0.1;
            *y = (*y + speed * step) % 1.0;
        }
    }

    fn render_update(&self, ctx: &mut RenderContext, _dt: f64) {
        let count = u64::try_from(self.positions.lock().len()).unwrap_or(u64::MAX);
        // Particles write color only; depth-only buffers keep their own masks.
        let _masks = ctx.masks.scoped(ColorMask::RGB);
        let _blend = ctx.blend.scoped(BlendMode::Additive);
        ctx.draws += count;
    }
}

/// Orbits the origin and, once `spawn_at` frames have been drawn, registers
/// a particle system from its render hook.
pub struct Camera {
    core: TaskCore,
    scheduler: Weak<DemoScheduler>,
    orbit: Mutex<f64>,
    frames: AtomicU64,
    spawn_at: u64,
    particles: Mutex<Option<Arc<Particles>>>,
}

impl Camera {
    pub fn new(scheduler: &Arc<DemoScheduler>, spawn_at: u64) -> Arc<Self> {
        Arc::new(Self {
            core: TaskCore::builder("camera").logic().render().running().build(),
            scheduler: Arc::downgrade(scheduler),
            orbit: Mutex::new(0.0),
            frames: AtomicU64::new(0),
            spawn_at,
            particles: Mutex::new(None),
        })
    }

    pub fn particles_spawned(&self) -> bool {
        self.particles.lock().is_some()
    }

    fn spawn_particles(&self) {
        let Some(scheduler) = self.scheduler.upgrade() else {
            return;
        };
        let particles = Particles::new(256);
        match scheduler.register_task(particles.clone()) {
            Ok(()) => {
                info!(frame = self.spawn_at, "particles registered mid-frame");
                *self.particles.lock() = Some(particles);
            }
            Err(err) => warn!(%err, "could not register particles"),
        }
    }
}

impl Task<RenderContext> for Camera {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn logic_update(&self, dt: f64) {
        let mut orbit = self.orbit.lock();
        *orbit = (*orbit + dt * 0.02) % 360.0;
    }

    fn render_update(&self, ctx: &mut RenderContext, _dt: f64) {
        let frame = self.frames.fetch_add(1, Ordering::Relaxed);
        for buffer in 0..DRAW_BUFFERS {
            ctx.masks.push_channel(buffer, ColorMask::ALL);
        }
        ctx.draws += 1;
        for buffer in (0..DRAW_BUFFERS).rev() {
            ctx.masks.pop_channel(buffer);
        }
        if frame == self.spawn_at {
            self.spawn_particles();
        }
    }
}

/// Samples an external input on its own thread at a fixed rate.
pub struct Sensor {
    core: TaskCore,
    epoch: Instant,
    samples: AtomicU64,
    reading: Mutex<f64>,
}

impl Sensor {
    pub fn new(hz: f64) -> Arc<Self> {
        Arc::new(Self {
            core: TaskCore::builder("sensor")
                .dedicated(hz)
                .render()
                .running()
                .build(),
            epoch: Instant::now(),
            samples: AtomicU64::new(0),
            reading: Mutex::new(0.0),
        })
    }

    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

impl Task<RenderContext> for Sensor {
    fn core(&self) -> &TaskCore {
        &self.core
    }

    fn logic_update(&self, dt: f64) {
        let t = self.epoch.elapsed().as_secs_f64();
        *self.reading.lock() = 20.0 + 5.0 * t.sin();
        let n = self.samples.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(sample = n, dt, "sensor sampled");
    }

    fn render_update(&self, _ctx: &mut RenderContext, _dt: f64) {
        trace!(reading = *self.reading.lock(), "sensor overlay");
    }
}
