use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use nalgebra::Vector3;
use tracing_subscriber::EnvFilter;

use rust_vo_init::frame::GradientSelector;
use rust_vo_init::geometry::{AffineBrightness, SE3};
use rust_vo_init::initializer::{CoarseInitializer, InitializerConfig};
use rust_vo_init::io::SyntheticScene;

const WIDTH: usize = 320;
const HEIGHT: usize = 240;
const MAX_FRAMES: usize = 40;
/// Sideways camera motion per frame, in units of the plane distance.
const STEP: f64 = 0.004;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => InitializerConfig::from_yaml_file(Path::new(&path))?,
        None => InitializerConfig::default(),
    };
    let scene = SyntheticScene::slanted_plane(WIDTH, HEIGHT, 7);
    let calibration = scene.calibration();

    println!(
        "Synthetic slanted plane {}x{}, {} pyramid levels",
        WIDTH,
        HEIGHT,
        config.pyramid_levels
    );

    let mut initializer = CoarseInitializer::new(config, WIDTH, HEIGHT)?;
    let reference = scene
        .frame(&SE3::identity(), AffineBrightness::default(), 1.0)
        .context("Failed to render reference frame")?;
    initializer.set_reference_frame(
        Arc::new(reference),
        &calibration,
        &mut GradientSelector::default(),
    )?;

    for i in 1..=MAX_FRAMES {
        let truth = SE3::from_translation(Vector3::new(STEP * i as f64, 0.0, 0.0));
        // slow brightness drift when the initializer estimates it, exposure unknown
        let brightness = if initializer.config().fix_affine {
            AffineBrightness::default()
        } else {
            AffineBrightness::new((0.002 * i as f64).ln_1p(), 0.3 * i as f64)
        };
        let frame = scene.frame(&truth, brightness, 0.0)?;

        let outcome = initializer.track_frame(&frame, &calibration)?;
        let t = outcome.pose.translation;
        let finest = outcome.level(0);
        println!(
            "frame {:>2}: t = [{:+.4}, {:+.4}, {:+.4}] (true x {:+.4}), a = {:+.4}, b = {:+.2}, good {}/{}, snapped {}",
            outcome.frame_index,
            t.x,
            t.y,
            t.z,
            truth.translation.x,
            outcome.affine.a,
            outcome.affine.b,
            finest.map_or(0, |r| r.num_good),
            finest.map_or(0, |r| r.num_points),
            outcome.snapped,
        );

        if outcome.initialized {
            let dir = t.normalize();
            println!(
                "Initialized after {} frames, translation direction [{:.3}, {:.3}, {:.3}]",
                outcome.frame_index, dir.x, dir.y, dir.z
            );
            return Ok(());
        }
    }

    println!("Not initialized after {} frames", MAX_FRAMES);
    Ok(())
}
