// Decoding songs that come back from the generator. Its output is untrusted:
// everything is checked and normalised here before it becomes a SongData.

use serde_json::Value;
use tracing::debug;

use super::pattern::{strip_code_fence, BeatPattern, PatternError};
use super::project::SongData;
use crate::shared::{MAX_BPM, MIN_BPM};

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error("malformed upstream response: {0}")]
    Malformed(String),
}

fn malformed(msg: impl Into<String>) -> UpstreamError {
    UpstreamError::Malformed(msg.into())
}

impl SongData {
    /// Validate generator JSON (optionally fenced) into a song.
    ///
    /// The beat pattern may be inline JSON or a JSON string; either way it
    /// is parsed and stored in canonical text form. A missing pattern means
    /// an empty one.
    pub fn from_upstream(raw: &str) -> Result<SongData, UpstreamError> {
        let body = strip_code_fence(raw);
        let mut value: Value = serde_json::from_str(body).map_err(|e| malformed(e.to_string()))?;
        let obj = value
            .as_object_mut()
            .ok_or_else(|| malformed("expected a JSON object"))?;

        let title_ok = obj
            .get("title")
            .and_then(Value::as_str)
            .is_some_and(|t| !t.trim().is_empty());
        if !title_ok {
            return Err(malformed("song has no title"));
        }
        if obj.get("artistName").and_then(Value::as_str).is_none() {
            return Err(malformed("song has no artistName"));
        }

        let bpm = obj
            .get("bpm")
            .and_then(|v| v.as_f64().or_else(|| v.as_str().and_then(|s| s.trim().parse().ok())))
            .ok_or_else(|| malformed("bpm is missing or not a number"))?;
        if !(MIN_BPM..=MAX_BPM).contains(&bpm) {
            return Err(malformed(format!("bpm {bpm} is outside {MIN_BPM}..={MAX_BPM}")));
        }
        obj.insert("bpm".to_string(), Value::from(bpm.round() as u32));

        let pattern = match obj.get("beatPattern") {
            None | Some(Value::Null) => BeatPattern::new(),
            Some(Value::String(s)) => BeatPattern::parse(s).map_err(pattern_error)?,
            Some(other) => BeatPattern::from_json_value(other).map_err(pattern_error)?,
        };
        obj.insert("beatPattern".to_string(), Value::String(pattern.serialize()));

        let song: SongData = serde_json::from_value(value).map_err(|e| malformed(e.to_string()))?;
        debug!(title = %song.title, bpm = song.bpm, "decoded upstream song");
        Ok(song)
    }

    pub fn to_pretty_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// The stored pattern, or the empty one plus the reason it was rejected.
    pub fn pattern(&self) -> (BeatPattern, Option<PatternError>) {
        BeatPattern::parse_or_empty(&self.beat_pattern)
    }
}

fn pattern_error(e: PatternError) -> UpstreamError {
    malformed(format!("beatPattern: {e}"))
}
