//! Command-line argument parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "wavesync")]
#[command(about = "Latency-compensated audio visualizer", long_about = None)]
pub struct Args {
    /// JSON configuration file
    #[arg(long, global = true, value_name = "FILE", default_value = "wavesync.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List audio output devices
    Devices,

    /// Write the effective configuration to the config file
    InitConfig,

    /// Play a WAV file and visualize it
    Play(PlayArgs),
}

#[derive(clap::Args, Debug)]
pub struct PlayArgs {
    /// WAV file to play
    pub wav: PathBuf,

    /// URL the media is served from (defaults to the page origin, making it same-origin)
    #[arg(long, value_name = "URL")]
    pub src_url: Option<String>,

    /// Playback duration in seconds (whole file when omitted)
    #[arg(long, value_name = "SECONDS")]
    pub seconds: Option<f64>,

    /// Write the last frame to a PNG file
    #[arg(long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Surface width in pixels
    #[arg(long, default_value = "960")]
    pub width: u32,

    /// Surface height in pixels
    #[arg(long, default_value = "540")]
    pub height: u32,
}

impl PlayArgs {
    /// Media URL as seen from the page
    pub fn media_url(&self, page_origin: &str) -> String {
        if let Some(ref url) = self.src_url {
            return url.clone();
        }
        let file = self
            .wav
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{}/media/{}", page_origin.trim_end_matches('/'), file)
    }
}
