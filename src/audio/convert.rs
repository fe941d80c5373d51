//! Sample rate and channel conversion between a PCM source and the device
//!
//! Streaming linear interpolation: the frames around the read position are kept
//! across blocks, and all buffers are sized up front so the output callback never
//! allocates.

use super::engine::PcmSource;

/// Sample rate and channel count of an interleaved stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl StreamFormat {
    pub fn new(sample_rate: u32, channels: u16) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
        }
    }
}

/// Adapts a [`PcmSource`] to the device's stream format
pub struct FormatAdapter {
    source_channels: usize,
    target_channels: usize,
    passthrough: bool,
    /// Source frames per output frame
    step: f64,
    /// Position between `prev` and `next`, in source frames
    frac: f64,
    prev: Vec<f32>,
    next: Vec<f32>,
    frame: Vec<f32>,
    /// Interleaved source frames fetched ahead of interpolation
    staging: Vec<f32>,
    staged: usize,
    cursor: usize,
    max_block: usize,
}

impl FormatAdapter {
    /// `max_block` is the largest callback size, in output frames, converted in one pass
    pub fn new(source: StreamFormat, target: StreamFormat, max_block: usize) -> Self {
        let max_block = max_block.max(1);
        let source_channels = usize::from(source.channels);
        let step = f64::from(source.sample_rate) / f64::from(target.sample_rate);
        let staging_frames = ((max_block + 2) as f64 * step).ceil() as usize + 4;

        Self {
            source_channels,
            target_channels: usize::from(target.channels),
            passthrough: source == target,
            step,
            // Primes `prev` and `next` with the first two source frames
            frac: 2.0,
            prev: vec![0.0; source_channels],
            next: vec![0.0; source_channels],
            frame: vec![0.0; source_channels],
            staging: vec![0.0; staging_frames * source_channels],
            staged: 0,
            cursor: 0,
            max_block,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        self.passthrough
    }

    /// Fills `out` (interleaved, target format) from `source`
    pub fn render(&mut self, source: &mut dyn PcmSource, out: &mut [f32]) {
        if self.passthrough {
            source.fill(out);
            return;
        }

        let block_len = self.max_block * self.target_channels;
        for block in out.chunks_mut(block_len) {
            self.render_block(source, block);
        }
    }

    fn render_block(&mut self, source: &mut dyn PcmSource, out: &mut [f32]) {
        let frames = out.len() / self.target_channels;
        let wanted = (self.frac + frames as f64 * self.step).ceil() as usize;
        self.stage(source, wanted);

        let mut chunks = out.chunks_exact_mut(self.target_channels);
        for target in &mut chunks {
            while self.frac >= 1.0 {
                self.advance();
                self.frac -= 1.0;
            }

            let t = self.frac as f32;
            for ((sample, &a), &b) in self.frame.iter_mut().zip(&self.prev).zip(&self.next) {
                *sample = a + (b - a) * t;
            }
            map_channels(&self.frame, target);
            self.frac += self.step;
        }
        chunks.into_remainder().fill(0.0);
    }

    /// Tops the staging area up to `wanted` frames, keeping unread frames
    fn stage(&mut self, source: &mut dyn PcmSource, wanted: usize) {
        let ch = self.source_channels;
        let unread = self.staged - self.cursor;
        self.staging
            .copy_within(self.cursor * ch..self.staged * ch, 0);
        self.staged = unread;
        self.cursor = 0;

        let capacity = self.staging.len() / ch;
        let missing = wanted.saturating_sub(unread).min(capacity - unread);
        if missing > 0 {
            source.fill(&mut self.staging[unread * ch..(unread + missing) * ch]);
            self.staged += missing;
        }
    }

    fn advance(&mut self) {
        let ch = self.source_channels;
        self.prev.copy_from_slice(&self.next);
        if self.cursor < self.staged {
            let start = self.cursor * ch;
            self.next.copy_from_slice(&self.staging[start..start + ch]);
            self.cursor += 1;
        } else {
            self.next.fill(0.0);
        }
    }
}

/// Maps one frame onto the target channel layout.
///
/// Mono is copied to every channel, anything mixed down to mono is averaged,
/// otherwise channels are matched by index and extra outputs stay silent.
fn map_channels(frame: &[f32], out: &mut [f32]) {
    match (frame.len(), out.len()) {
        (a, b) if a == b => out.copy_from_slice(frame),
        (1, _) => out.fill(frame[0]),
        (n, 1) => out[0] = frame.iter().sum::<f32>() / n as f32,
        (n, _) => {
            for (c, sample) in out.iter_mut().enumerate() {
                *sample = if c < n { frame[c] } else { 0.0 };
            }
        }
    }
}
