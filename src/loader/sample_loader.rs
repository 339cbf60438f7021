use std::path::Path;

use anyhow::Context;
use tracing::info;

use crate::audio::SampleBuffer;

// Decode an instrumental from disk, resampled for the engine. Runs off the
// audio thread; the engine only ever receives the finished buffer.
pub fn load(path: &Path, target_rate: u32) -> anyhow::Result<SampleBuffer> {
    let buffer = SampleBuffer::load_wav(path, target_rate)
        .with_context(|| format!("failed to load instrumental {}", path.display()))?;
    if buffer.is_empty() {
        anyhow::bail!("instrumental {} has no audio", path.display());
    }
    info!(path = %path.display(), secs = buffer.duration_secs(), "instrumental loaded");
    Ok(buffer)
}
