//! Phonate host entry point.
//!
//! Drives a `VocoderSession` from the stub predictor with a slowly varying
//! synthetic camera image, either playing live or exporting a WAV.

mod cli;
mod settings;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use phonate_core::{
    audio::device::list_output_devices, ImageFrame, PredictorHandle, StubPredictor,
    VocoderSession,
};
use tracing::{debug, info, warn};

use cli::{parse_args, Command, USAGE};
use settings::{default_settings_path, load_settings, save_settings, AppSettings};

/// Side length of the synthetic camera image.
const IMAGE_SIZE: u32 = 16;

/// Frames pushed before an offline export snapshot is taken.
const EXPORT_WARMUP_FRAMES: usize = 8;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("phonate=info")),
        )
        .init();

    let args = match parse_args(std::env::args().skip(1)) {
        Ok(Some(args)) => args,
        Ok(None) => {
            println!("{USAGE}");
            return Ok(());
        }
        Err(e) => anyhow::bail!("{e}\n\n{USAGE}"),
    };

    let settings_path = args.config.clone().unwrap_or_else(default_settings_path);

    if args.command == Command::InitConfig {
        save_settings(&settings_path, &AppSettings::default())
            .with_context(|| format!("writing {}", settings_path.display()))?;
        info!(path = %settings_path.display(), "default settings written");
        return Ok(());
    }

    if args.command == Command::Devices {
        for d in list_output_devices() {
            println!("{}{}", d.name, if d.is_default { "  (default)" } else { "" });
        }
        return Ok(());
    }

    let mut settings = load_settings(&settings_path);
    settings.apply_env_overrides();
    if let Some(secs) = args.seconds {
        settings.duration_secs = secs;
    }
    if args.device.is_some() {
        settings.preferred_output_device = args.device.clone();
    }
    settings.normalize();
    info!(path = %settings_path.display(), "settings loaded");

    let config = settings.vocoder.clone();
    let stub = StubPredictor::new(config.fft_size, config.sample_rate);
    let session = Arc::new(VocoderSession::new(config, PredictorHandle::new(stub))?);
    session.warm_up()?;

    match args.command {
        Command::Export => export(&session, &settings, &args.out),
        _ => play(session, &settings).await,
    }
}

/// Grey level drifting through a full cycle every ~4 s of frames.
fn synthetic_image(frame_idx: usize, interval_ms: u64) -> ImageFrame {
    let t = frame_idx as f64 * interval_ms as f64 / 1000.0;
    let level = 128.0 + 100.0 * (t * std::f64::consts::TAU / 4.0).sin();
    ImageFrame::filled(IMAGE_SIZE, IMAGE_SIZE, level.round().clamp(0.0, 255.0) as u8)
}

async fn play(session: Arc<VocoderSession>, settings: &AppSettings) -> anyhow::Result<()> {
    let mut events = session.subscribe_synthesis();
    tokio::spawn(async move {
        while let Ok(ev) = events.recv().await {
            debug!(seq = ev.seq, f0 = ev.f0, rms = ev.rms, "synthesized");
        }
    });

    session.start_with_device(settings.preferred_output_device.clone())?;

    let mut ticker = tokio::time::interval(Duration::from_millis(settings.frame_interval_ms));
    let frames = (settings.duration_secs * 1000.0 / settings.frame_interval_ms as f64).ceil() as usize;
    for idx in 0..frames {
        ticker.tick().await;
        if let Err(e) = session.process_image(&synthetic_image(idx, settings.frame_interval_ms)) {
            warn!("frame {idx} dropped: {e}");
        }
    }

    session.stop()?;
    let snap = session.diagnostics_snapshot();
    info!(
        frames = snap.frames_received,
        crossfades = snap.crossfades_completed,
        underrun_samples = snap.underrun_samples,
        "playback finished"
    );
    Ok(())
}

fn export(
    session: &VocoderSession,
    settings: &AppSettings,
    out: &std::path::Path,
) -> anyhow::Result<()> {
    let _renderer = session.start_offline()?;
    for idx in 0..EXPORT_WARMUP_FRAMES {
        session.process_image(&synthetic_image(idx, settings.frame_interval_ms))?;
    }

    let snapshot = session
        .export_snapshot()
        .context("no filter installed; nothing to export")?;
    let samples = snapshot.render(settings.duration_secs)?;
    phonate_core::write_wav(out, &samples, snapshot.sample_rate)?;
    session.stop()?;

    info!(
        path = %out.display(),
        f0 = snapshot.f0,
        seconds = settings.duration_secs,
        "export finished"
    );
    Ok(())
}
