// scheduler_demo.rs - CLI that drives a RaytracerController against a
// synthetic BlockRenderer and dumps the composited frame to PNG.
//
// The real ray-triangle intersection / BVH / material kernel this crate
// coordinates is out of scope (SPEC_FULL.md §1); `DemoRenderer` below is a
// stand-in that paints a deterministic gradient so block seams and
// progressive fill are visible in the output image.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use image::{ImageBuffer, Rgba};
use log::info;
use serde_json::Value;

use render_scheduler::{
    BlockRenderer, BlockRendererFactory, RaytracerController, RenderConfig, Result, SchedulerEvent,
};

/// Drive the block render scheduler against a synthetic worker pool.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Output viewport width, in pixels.
    #[arg(short = 'W', long, default_value_t = 512)]
    width: u32,

    /// Output viewport height, in pixels.
    #[arg(short = 'H', long, default_value_t = 512)]
    height: u32,

    /// Block edge length, in pixels.
    #[arg(short, long, default_value_t = 64)]
    block_size: u32,

    /// Number of worker raytracers in the pool.
    #[arg(short, long, default_value_t = 4)]
    workers: usize,

    /// Anti-alias sampling level (1, 2, 4, or 8).
    #[arg(long, default_value_t = 1)]
    anti_alias: u8,

    /// Enable the de-band post-process on the composited frame.
    #[arg(long)]
    de_band: bool,

    /// Where to write the composited PNG.
    #[arg(short, long, default_value = "scheduler_demo.png")]
    output: PathBuf,
}

/// A stand-in for the opaque raytracing kernel: paints each block from its
/// own origin so block boundaries are visible, with an artificial delay
/// proportional to block area so the demo exercises uneven load across
/// workers the way real per-pixel cost would.
struct DemoRenderer;

#[async_trait]
impl BlockRenderer for DemoRenderer {
    async fn set_scene(&mut self, _width: u32, _height: u32, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn render_block(&mut self, x: u32, y: u32, w: u32, h: u32, _aa: u8) -> Result<Vec<u8>> {
        let micros = (w as u64 * h as u64) / 40;
        tokio::time::sleep(Duration::from_micros(micros)).await;

        let mut out = Vec::with_capacity(3 * w as usize * h as usize);
        for j in 0..h {
            for i in 0..w {
                let px = x + i;
                let py = y + j;
                out.push((px % 256) as u8);
                out.push((py % 256) as u8);
                out.push(((px ^ py) % 256) as u8);
            }
        }
        Ok(out)
    }
}

struct DemoFactory;

impl BlockRendererFactory for DemoFactory {
    fn create(&self) -> Box<dyn BlockRenderer> {
        Box::new(DemoRenderer)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let controller = RaytracerController::new(Arc::new(DemoFactory));
    let mut events = controller.subscribe();

    controller.resize_pool(args.workers).await?;
    controller
        .start(RenderConfig {
            block_size: args.block_size,
            width: args.width,
            height: args.height,
            anti_alias: args.anti_alias,
            de_band: args.de_band,
            render_params: Value::Null,
        })
        .await?;

    loop {
        match events.recv().await {
            Ok(SchedulerEvent::Progress { done, total, .. }) => {
                info!("progress: {done}/{total}");
            }
            Ok(SchedulerEvent::Done { duration }) => {
                info!("done in {duration:?}");
                break;
            }
            Ok(SchedulerEvent::Queued { .. } | SchedulerEvent::Unqueued { .. }) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                log::warn!("event subscriber lagged, skipped {skipped} events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    let snapshot = controller.target().await.expect("start() was awaited above");
    let buffer: ImageBuffer<Rgba<u8>, _> =
        ImageBuffer::from_raw(snapshot.width, snapshot.height, snapshot.pixels)
            .expect("frame buffer geometry always matches width * height * 4");
    buffer.save(&args.output)?;
    info!("wrote {}", args.output.display());

    Ok(())
}
