// Downloadable artifacts and share links for a song.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::project::SongData;
use super::render::write_atomic;

const SHARE_PARAM: &str = "song";

#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("could not write artifact: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not encode song: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not a share link: {0}")]
    BadLink(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactKind {
    Lyrics,
    StyleGuide,
    SongJson,
    CoverArt,
    Audio,
}

impl ArtifactKind {
    pub fn suffix(self) -> &'static str {
        match self {
            ArtifactKind::Lyrics => "_lyrics.txt",
            ArtifactKind::StyleGuide => "_style_guide.txt",
            ArtifactKind::SongJson => ".json",
            ArtifactKind::CoverArt => "_cover.png",
            ArtifactKind::Audio => ".flac",
        }
    }
}

/// ASCII alphanumerics lowercased, everything else becomes `_`.
pub fn sanitize(s: &str) -> String {
    let out: String = s
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.is_empty() { "untitled".to_string() } else { out }
}

pub fn artifact_file_name(song: &SongData, kind: ArtifactKind) -> String {
    format!(
        "{}_{}{}",
        sanitize(&song.artist_name),
        sanitize(&song.title),
        kind.suffix()
    )
}

pub fn lyrics_text(song: &SongData) -> String {
    format!("{}\nby {}\n\n{}\n", song.title, song.artist_name, song.lyrics)
}

pub fn style_guide_text(song: &SongData) -> String {
    format!(
        "{} - production notes\nGenre: {}\nBPM: {}\n\n{}\n",
        song.title, song.genre, song.bpm, song.style_guide
    )
}

pub fn song_json(song: &SongData) -> Result<String, ExportError> {
    Ok(song.to_pretty_json()?)
}

pub fn write_artifact(dir: &Path, name: &str, bytes: &[u8]) -> Result<PathBuf, ExportError> {
    let path = write_atomic(dir, name, bytes)?;
    info!(path = %path.display(), bytes = bytes.len(), "artifact written");
    Ok(path)
}

/// Write the text artifacts (lyrics, style guide, song JSON). Returns the
/// paths in that order.
pub fn export_text_artifacts(dir: &Path, song: &SongData) -> Result<Vec<PathBuf>, ExportError> {
    let items = [
        (ArtifactKind::Lyrics, lyrics_text(song)),
        (ArtifactKind::StyleGuide, style_guide_text(song)),
        (ArtifactKind::SongJson, song_json(song)?),
    ];
    items
        .iter()
        .map(|(kind, body)| write_artifact(dir, &artifact_file_name(song, *kind), body.as_bytes()))
        .collect()
}

/// What a share link carries: enough to show the song, not the whole record.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharePayload {
    pub title: String,
    pub artist_name: String,
    pub genre: String,
    pub bpm: u32,
    pub beat_pattern: String,
}

impl From<&SongData> for SharePayload {
    fn from(song: &SongData) -> Self {
        Self {
            title: song.title.clone(),
            artist_name: song.artist_name.clone(),
            genre: song.genre.clone(),
            bpm: song.bpm,
            beat_pattern: song.beat_pattern.clone(),
        }
    }
}

pub fn share_link(base_url: &str, song: &SongData) -> Result<String, ExportError> {
    let json = serde_json::to_vec(&SharePayload::from(song))?;
    let encoded = URL_SAFE_NO_PAD.encode(json);
    let base = base_url.split(['?', '#']).next().unwrap_or(base_url);
    Ok(format!("{base}?{SHARE_PARAM}={encoded}"))
}

pub fn decode_share_link(url: &str) -> Result<SharePayload, ExportError> {
    let (_, query) = url
        .split_once('?')
        .ok_or_else(|| ExportError::BadLink("no query string".into()))?;
    let encoded = query
        .split('&')
        .find_map(|pair| pair.strip_prefix(SHARE_PARAM)?.strip_prefix('='))
        .ok_or_else(|| ExportError::BadLink(format!("no '{SHARE_PARAM}' parameter")))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| ExportError::BadLink(e.to_string()))?;
    Ok(serde_json::from_slice(&bytes)?)
}
