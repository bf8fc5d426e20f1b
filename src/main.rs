// src/main.rs

use anyhow::{Context, Result};
use log::{error, info};
use std::sync::Arc;
use std::time::Duration;
use vsync_loop::{Backend, Config, FrameTick, HeadlessSurface, RenderLoopDriver, CONFIG};

/// Moves a point back and forth across a unit interval and logs progress.
struct DemoBackend {
    position: f32,
    velocity: f32,
    frames: u64,
    log_every: u64,
}

impl DemoBackend {
    fn new(log_every: u64) -> Self {
        Self {
            position: 0.0,
            velocity: 0.5,
            frames: 0,
            log_every,
        }
    }
}

impl Backend for DemoBackend {
    fn initialize(&mut self) -> Result<()> {
        info!("DemoBackend: Initialized");
        Ok(())
    }

    fn update(&mut self, tick: &FrameTick) -> Result<()> {
        self.position += self.velocity * tick.dt();
        if !(0.0..=1.0).contains(&self.position) {
            self.velocity = -self.velocity;
            self.position = self.position.clamp(0.0, 1.0);
        }
        self.frames = tick.frame_index + 1;
        Ok(())
    }

    fn render(&mut self) -> Result<()> {
        if self.log_every > 0 && self.frames % self.log_every == 0 {
            info!(
                "DemoBackend: Frame {} position {:.3}",
                self.frames, self.position
            );
        }
        Ok(())
    }

    fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        info!("DemoBackend: Resized to {}x{}", width, height);
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    info!("Starting vsync-loop demo...");

    // An explicit path argument wins over $VSYNC_LOOP_CONFIG.
    let config = match std::env::args().nth(1) {
        Some(path) => Config::load(&path).context("Failed to load config from argument")?,
        None => CONFIG.clone(),
    };
    info!("Configuration: {:?}", config);

    let surface = Arc::new(HeadlessSurface::new(config.demo.refresh_hz));
    let driver = RenderLoopDriver::new(&config);

    let mut handle = driver
        .start(&surface, DemoBackend::new(config.demo.log_every))
        .context("Failed to start render loop")?;
    handle.notify_resize(800, 600);

    std::thread::sleep(Duration::from_millis(config.demo.run_ms));

    match driver.stop(&mut handle) {
        Ok(stats) => {
            info!(
                "Render loop finished: {} frames, {:.1} fps, avg work {:?}, worst {:?}",
                stats.frames, stats.fps, stats.average_work, stats.worst_work
            );
            info!("Surface presented {} frames", surface.presents());
            Ok(())
        }
        Err(e) => {
            error!("Render loop ended with an error: {}", e);
            Err(e).context("Render loop failed")
        }
    }
}
