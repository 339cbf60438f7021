// Persisted records: projects and the song each one carries.
//
// Field names are camelCase on disk so stored projects and generator output
// share one shape.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::shared::DEFAULT_BPM;

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    pub created_at: i64, // unix millis
    pub updated_at: i64,
    #[serde(default)]
    pub song_data: Option<SongData>, // None until the first song lands
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generation_params: Option<GenerationParams>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_prompt: Option<String>,
}

impl Project {
    pub const DEFAULT_NAME: &'static str = "My First Project";

    pub fn new(name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: now,
            updated_at: now,
            song_data: None,
            artist_image_url: None,
            video_url: None,
            generation_params: None,
            original_prompt: None,
        }
    }

    // never moves backwards, even if the wall clock does
    pub fn touch(&mut self) {
        self.updated_at = now_millis().max(self.updated_at);
    }

    pub fn bpm(&self) -> u32 {
        self.song_data.as_ref().map_or(DEFAULT_BPM, |s| s.bpm)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SongData {
    pub title: String,
    pub artist_name: String,
    #[serde(default)]
    pub artist_bio: String,
    #[serde(default)]
    pub cover_art_prompt: String,
    #[serde(default)]
    pub lyrics: String,
    #[serde(default)]
    pub style_guide: String,
    #[serde(default = "empty_pattern")]
    pub beat_pattern: String, // raw JSON text, see pipeline::pattern
    #[serde(default)]
    pub singer_gender: SingerGender,
    #[serde(default)]
    pub artist_type: ArtistType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vocal_melody: Option<VocalMelody>,
    pub bpm: u32,
    #[serde(default)]
    pub genre: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_prompt: Option<String>,
}

fn empty_pattern() -> String {
    "{}".to_string()
}

impl SongData {
    /// A placeholder song so a fresh project can be programmed by hand.
    pub fn blank(bpm: u32) -> Self {
        Self {
            title: "Untitled".to_string(),
            artist_name: "Unknown Artist".to_string(),
            artist_bio: String::new(),
            cover_art_prompt: String::new(),
            lyrics: String::new(),
            style_guide: String::new(),
            beat_pattern: empty_pattern(),
            singer_gender: SingerGender::default(),
            artist_type: ArtistType::default(),
            vocal_melody: None,
            bpm,
            genre: String::new(),
            video_prompt: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SingerGender {
    Male,
    Female,
    Duet,
    #[default]
    Any,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtistType {
    #[default]
    Solo,
    Band,
    Duo,
    Producer,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VocalMelody {
    #[serde(default)]
    pub sections: Vec<MelodySection>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MelodySection {
    pub name: String,
    #[serde(default)]
    pub notes: Vec<MelodyNote>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MelodyNote {
    pub pitch: String, // "C4", "F#3", ...
    pub start_beat: f64,
    pub duration_beats: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub syllable: Option<String>,
}

/// What the song was generated from, kept so it can be regenerated.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genre: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mood: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub singer_gender: Option<SingerGender>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist_type: Option<ArtistType>,
    #[serde(default)]
    pub instrumental_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_projects_get_unique_ids() {
        let a = Project::new("a");
        let b = Project::new("b");
        assert_ne!(a.id, b.id);
        assert_eq!(a.created_at, a.updated_at);
        assert_eq!(a.bpm(), DEFAULT_BPM);
    }

    #[test]
    fn touch_never_goes_back() {
        let mut p = Project::new("p");
        p.updated_at = i64::MAX - 1;
        p.touch();
        assert_eq!(p.updated_at, i64::MAX - 1);
    }

    #[test]
    fn stored_shape_is_camel_case() {
        let mut p = Project::new("Demo");
        p.song_data = Some(SongData::blank(96));
        let json = serde_json::to_value(&p).unwrap();
        assert!(json.get("createdAt").is_some());
        assert!(json.get("updatedAt").is_some());
        let song = json.get("songData").unwrap();
        assert_eq!(song.get("beatPattern").unwrap(), "{}");
        assert_eq!(song.get("singerGender").unwrap(), "any");
        assert!(json.get("videoUrl").is_none());

        let back: Project = serde_json::from_value(json).unwrap();
        assert_eq!(back, p);
    }

    #[test]
    fn minimal_record_loads() {
        let raw = r#"{"id":"x","name":"Old","createdAt":1,"updatedAt":2}"#;
        let p: Project = serde_json::from_str(raw).unwrap();
        assert!(p.song_data.is_none());
        assert_eq!(p.updated_at, 2);
    }
}
