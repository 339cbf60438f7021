use hitgrid::pipeline::export::{artifact_file_name, ArtifactKind};
use hitgrid::pipeline::pattern::BeatPattern;
use hitgrid::pipeline::persistence::{FileStore, KeyValueStore, ProjectStore, ACTIVE_KEY, PROJECTS_KEY};
use hitgrid::pipeline::project::{Project, SongData};
use hitgrid::pipeline::render::{render_duration_secs, render_pattern};

#[test]
fn missing_or_corrupt_storage_heals_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = ProjectStore::open(dir.path()).unwrap();
    assert_eq!(store.projects().len(), 1);
    assert_eq!(store.active().name, Project::DEFAULT_NAME);
    assert!(dir.path().join("projects.json").exists());

    let mut raw = FileStore::open(dir.path()).unwrap();
    raw.set(PROJECTS_KEY, "[{broken").unwrap();
    raw.set(ACTIVE_KEY, "whatever").unwrap();
    let healed = ProjectStore::open(dir.path()).unwrap();
    assert_eq!(healed.projects().len(), 1);
    assert_eq!(healed.active_id(), healed.projects()[0].id);
    assert_eq!(raw.get(ACTIVE_KEY).unwrap().unwrap(), healed.active_id());
}

#[test]
fn deleting_the_active_project_selects_the_other() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ProjectStore::open(dir.path()).unwrap();
    let first = store.active().id.clone();
    let second = store.create("Second", true).unwrap();

    store.delete(&second.id).unwrap();
    assert_eq!(store.active_id(), first);
    assert_eq!(store.projects().len(), 1);

    store.delete(&first).unwrap();
    assert_eq!(store.projects().len(), 1);
    assert_ne!(store.active_id(), first);
    assert_eq!(store.active().name, Project::DEFAULT_NAME);

    // and the result is what a fresh load sees
    let reloaded = ProjectStore::open(dir.path()).unwrap();
    assert_eq!(reloaded.active_id(), store.active_id());
}

#[test]
fn deleting_an_inactive_project_keeps_the_selection() {
    let dir = tempfile::tempdir().unwrap();
    let mut store = ProjectStore::open(dir.path()).unwrap();
    let other = store.create("Other", false).unwrap();
    let active = store.active_id().to_string();
    store.delete(&other.id).unwrap();
    assert_eq!(store.active_id(), active);
}

#[test]
fn rendered_file_has_the_expected_length() {
    let dir = tempfile::tempdir().unwrap();
    let mut song = SongData::blank(150);
    song.title = "Four On The Floor".into();
    let pattern = BeatPattern::parse(r#"{"kick":[0,4,8,12],"hihat":[2,6,10,14]}"#).unwrap();
    let rate = 22_050;

    let audio = render_pattern(&pattern, song.bpm as f64, rate).unwrap();
    let path = audio
        .write_to(dir.path(), &artifact_file_name(&song, ArtifactKind::Audio))
        .unwrap();
    assert!(path.ends_with("unknown_artist_four_on_the_floor.flac"));

    let mut reader = claxon::FlacReader::open(&path).unwrap();
    let info = reader.streaminfo();
    assert_eq!(info.channels, 2);
    assert_eq!(info.sample_rate, rate);
    let frames = reader.samples().count() / info.channels as usize;
    let secs = frames as f64 / info.sample_rate as f64;
    assert!((secs - render_duration_secs(150.0)).abs() < 1.0 / rate as f64);
    assert!((secs - 16.0 * 4.0 * 60.0 / 150.0).abs() < 1e-3);
}
