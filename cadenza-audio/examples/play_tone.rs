//! Plays two seconds of a 440Hz sine through the default output device,
//! printing which backend the fallback chain picked.

use std::f32::consts::TAU;
use std::time::Duration;

use anyhow::Result;
use cadenza_audio::{AudioFormat, AudioSubsystem};

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let audio = AudioSubsystem::new()?;
    let format = AudioFormat::new(44_100, 1, 1_024);
    let mut device = audio.open_output_device(None, &format)?;
    println!("backend: {:?}", device.backend_kind());

    let mut phase = 0.0_f32;
    let step = 440.0 * TAU / format.sample_rate as f32;
    device.set_callback(move |span| {
        for sample in span.iter_mut() {
            *sample = phase.sin() * 0.2;
            phase = (phase + step) % TAU;
        }
        Ok(())
    });

    device.start()?;
    std::thread::sleep(Duration::from_secs(2));
    device.stop()?;

    println!("latency: {:.1}ms", device.latency_ms());
    println!("avg render pass: {:.3}ms", device.average_render_ms());
    println!("{}", device.status_summary());
    Ok(())
}
