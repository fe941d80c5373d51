//! wavesync - visualisation audio temps réel
//!
//! Demo binary: plays a WAV file through the default output device and renders
//! the latency-compensated waveform into an offscreen surface.

mod cli;

use anyhow::Context;
use clap::Parser;
use cli::{Args, Command, PlayArgs};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wavesync::audio::{CpalEngine, MediaElement};
use wavesync::canvas::{CanvasHost, Container, PixmapSurface, SurfaceSize};
use wavesync::config::VisualizerConfig;
use wavesync::media::WavElement;
use wavesync::session::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wavesync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    tracing::info!("wavesync v{}", env!("CARGO_PKG_VERSION"));
    let config = VisualizerConfig::load(&args.config);

    match args.command {
        Command::Devices => {
            let devices = CpalEngine::list_devices();
            tracing::info!("Output devices: {:?}", devices);
            println!("Output devices:");
            for device in &devices {
                println!("  - {}", device);
            }
        }
        Command::InitConfig => {
            config
                .save(&args.config)
                .with_context(|| format!("Cannot write {}", args.config.display()))?;
            println!("Configuration written to {}", args.config.display());
        }
        Command::Play(play_args) => play(play_args, config).await?,
    }

    Ok(())
}

async fn play(args: PlayArgs, config: VisualizerConfig) -> anyhow::Result<()> {
    let url = args.media_url(&config.page_origin);
    let element = Arc::new(
        WavElement::open(&args.wav, url)
            .with_context(|| format!("Cannot open {}", args.wav.display()))?,
    );
    let frame_period = config.render.frame_period();
    let engine = CpalEngine::new();
    let session = Session::new(Arc::new(engine.clone()), config);

    session
        .set_source(Some(Arc::clone(&element) as Arc<dyn MediaElement>))
        .await;
    // The tap must be attached before playback starts
    session.resume().await;
    element.clock().play();

    let connected = session.is_connected().await;
    let mut untapped = None;
    if !connected {
        tracing::info!("Playing without analysis, showing the synthetic waveform");
        let direct = Arc::clone(&element);
        let analysis = session.config().analysis.clone();
        let opened =
            tokio::task::spawn_blocking(move || engine.play_untapped(&*direct, &analysis)).await?;
        match opened {
            Ok(output) => untapped = Some(output),
            Err(e) => tracing::warn!("No audible output: {}", e),
        }
    }
    // No output stream means nothing advances the clock
    let silent = !connected && untapped.is_none();

    let container = Container::new(SurfaceSize::new(args.width, args.height));
    let mut host = CanvasHost::new(Arc::new(PixmapSurface::factory()), frame_period);
    host.mount(&container, session.render_loop())?;

    let limit = args
        .seconds
        .filter(|s| s.is_finite() && *s > 0.0)
        .map(Duration::from_secs_f64)
        .unwrap_or_else(|| element.clock().duration());
    let started = Instant::now();
    let mut last = started;
    let mut ticker = tokio::time::interval(frame_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        let now = Instant::now();
        let clock = element.clock();
        if silent {
            // Nothing consumes the audio, follow the wall clock
            clock.advance(now - last);
        }
        last = now;
        session.update_playback(clock.is_playing(), clock.position());

        if now - started >= limit || clock.is_finished() {
            break;
        }
    }

    element.clock().pause();
    session.update_playback(false, element.clock().position());
    if let Some(mut output) = untapped {
        output.close();
    }

    if let Some(ref path) = args.output {
        match host.with_surface(|surface| surface.save_png(path)) {
            Some(result) => result.with_context(|| format!("Cannot export {}", path.display()))?,
            None => tracing::warn!("No surface to export"),
        }
    }
    tracing::info!("Frames drawn: {}", host.frames_drawn().unwrap_or(0));

    host.unmount();
    let status = session.status().await;
    session.dispose().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    Ok(())
}
