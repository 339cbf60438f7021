// Sits between the TUI and the engine. Owns the working copy of the active
// project and every bit of session state; turns input events into engine
// commands and project updates, and engine events back into display state.
//
// Sync is one way: the session edits its project copy and pushes it to the
// store on save. Nothing flows back from the store while a session runs.

use std::path::PathBuf;

use crossbeam_channel::{Receiver, TryRecvError};
use tracing::{debug, info, warn};

use crate::audio::SampleBuffer;
use crate::audio_api::{AudioCommand, EngineEvent};
use crate::pipeline::export::{artifact_file_name, ArtifactKind};
use crate::pipeline::pattern::{BeatPattern, PatternError};
use crate::pipeline::persistence::{KeyValueStore, ProjectStore, StoreError};
use crate::pipeline::project::{Project, SongData};
use crate::pipeline::render::{self, RenderError};
use crate::shared::{
    clamp_bpm, Banner, DisplayState, InputEvent, Instrument, LedState, PlaybackState, RetryAction,
    SourceKind, NUM_INSTRUMENTS, STEPS_PER_PATTERN,
};

const AUTOSAVE_SECS: f64 = 2.0;

/// Everything an offline render needs, captured when it was requested so a
/// retry runs with exactly the same inputs.
#[derive(Clone, Debug)]
pub enum RenderRequest {
    Pattern {
        raw: String,
        bpm: f64,
        sample_rate: u32,
        out_dir: PathBuf,
        file_name: String,
    },
    Instrumental {
        buffer: SampleBuffer,
        bpm: f64,
        out_dir: PathBuf,
        file_name: String,
    },
}

impl RenderRequest {
    pub fn run(&self) -> Result<PathBuf, RenderError> {
        match self {
            RenderRequest::Pattern {
                raw,
                bpm,
                sample_rate,
                out_dir,
                file_name,
            } => render::render_pattern_text(raw, *bpm, *sample_rate)?.write_to(out_dir, file_name),
            RenderRequest::Instrumental {
                buffer,
                bpm,
                out_dir,
                file_name,
            } => render::render_instrumental(buffer, *bpm)?.write_to(out_dir, file_name),
        }
    }
}

type RenderResult = Result<PathBuf, String>;

pub struct Session<S: KeyValueStore> {
    store: ProjectStore<S>,
    project: Project, // working copy
    pattern: BeatPattern,
    pattern_error: Option<PatternError>,
    playback: PlaybackState,
    source: SourceKind,
    ready: bool,
    cursor: (usize, usize), // (instrument row, step)
    instrumental: Option<SampleBuffer>,
    banner: Option<Banner>,
    pending: Option<RetryAction>, // request an engine error would belong to
    render_job: Option<Receiver<RenderResult>>,
    last_render: Option<RenderRequest>,
    out_dir: PathBuf,
    sample_rate: u32,
    dirty_for: Option<f64>, // seconds since the first unsaved edit
    status: String,
    display: DisplayState,
}

impl<S: KeyValueStore> Session<S> {
    pub fn new(store: ProjectStore<S>, out_dir: PathBuf, sample_rate: u32) -> Self {
        let project = store.active().clone();
        let (pattern, pattern_error) = match &project.song_data {
            Some(song) => song.pattern(),
            None => (BeatPattern::new(), None),
        };
        if let Some(e) = &pattern_error {
            warn!(error = %e, project = %project.name, "stored beat pattern is invalid");
        }
        let playback = PlaybackState {
            bpm: clamp_bpm(project.bpm() as f64),
            ..PlaybackState::default()
        };
        let banner = pattern_error.as_ref().map(|e| Banner {
            message: e.to_string(),
            retry: None,
        });
        let mut session = Self {
            store,
            project,
            pattern,
            pattern_error,
            playback,
            source: SourceKind::None,
            ready: false,
            cursor: (0, 0),
            instrumental: None,
            banner,
            pending: None,
            render_job: None,
            last_render: None,
            out_dir,
            sample_rate,
            dirty_for: None,
            status: String::new(),
            display: blank_display(),
        };
        session.refresh_display();
        session
    }

    /// Offer an instrumental as the alternative source.
    pub fn with_instrumental(mut self, buffer: SampleBuffer) -> Self {
        self.instrumental = Some(buffer);
        self
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn store(&self) -> &ProjectStore<S> {
        &self.store
    }

    pub fn pattern(&self) -> &BeatPattern {
        &self.pattern
    }

    pub fn playback(&self) -> PlaybackState {
        self.playback
    }

    pub fn banner(&self) -> Option<&Banner> {
        self.banner.as_ref()
    }

    pub fn is_busy(&self) -> bool {
        self.render_job.is_some()
    }

    /// What the engine needs to mirror this session.
    pub fn startup_commands(&self) -> Vec<AudioCommand> {
        vec![
            AudioCommand::SetBpm(self.playback.bpm),
            AudioCommand::LoadPattern {
                raw: self.pattern_text(),
            },
        ]
    }

    pub fn handle_input(&mut self, event: InputEvent) -> Vec<AudioCommand> {
        let cmds = match event {
            InputEvent::TogglePlay => {
                if !self.playback.running {
                    self.pending = Some(RetryAction::Play);
                }
                vec![AudioCommand::TogglePlay]
            }
            InputEvent::CursorLeft => self.move_cursor(0, -1),
            InputEvent::CursorRight => self.move_cursor(0, 1),
            InputEvent::CursorUp => self.move_cursor(-1, 0),
            InputEvent::CursorDown => self.move_cursor(1, 0),
            InputEvent::ToggleStep => self.toggle_at_cursor(),
            InputEvent::NudgeBpm(delta) => self.nudge_bpm(delta),
            InputEvent::SwitchSource => self.switch_source(),
            InputEvent::Render => {
                self.request_render();
                vec![]
            }
            InputEvent::Retry => self.retry(),
            InputEvent::DismissBanner => {
                self.banner = None;
                vec![]
            }
            InputEvent::Save => {
                self.save_or_banner();
                vec![]
            }
            InputEvent::Quit => {
                if self.has_unsaved_edits() {
                    self.save_or_banner();
                }
                vec![]
            }
        };
        self.refresh_display();
        cmds
    }

    pub fn on_engine_event(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Step(step) => self.playback.current_step = Some(step),
            EngineEvent::Transport { running } => {
                self.playback.running = running;
                if running {
                    self.pending = None;
                } else {
                    self.playback.current_step = None;
                }
            }
            EngineEvent::Source { kind, ready } => {
                self.source = kind;
                self.ready = ready;
            }
            EngineEvent::Error(message) => {
                let retry = self.pending.take();
                self.show_error(message, retry);
            }
        }
        self.refresh_display();
    }

    /// Housekeeping once per UI frame: collect a finished render and
    /// autosave edits that have settled.
    pub fn tick(&mut self, elapsed: f64) {
        if let Some(rx) = &self.render_job {
            match rx.try_recv() {
                Ok(Ok(path)) => {
                    self.render_job = None;
                    self.status = format!("rendered {}", path.display());
                }
                Ok(Err(message)) => {
                    self.render_job = None;
                    self.show_error(message, Some(RetryAction::Render));
                }
                Err(TryRecvError::Disconnected) => {
                    self.render_job = None;
                    self.show_error("render worker stopped unexpectedly".to_string(), Some(RetryAction::Render));
                }
                Err(TryRecvError::Empty) => {}
            }
        }

        if let Some(t) = self.dirty_for.as_mut() {
            *t += elapsed;
            if *t >= AUTOSAVE_SECS {
                self.save_or_banner();
            }
        }
        self.refresh_display();
    }

    pub fn save(&mut self) -> Result<(), StoreError> {
        let saved = self.store.update(self.project.clone())?;
        debug!(id = %saved.id, "project saved");
        self.project = saved;
        self.dirty_for = None;
        Ok(())
    }

    pub fn display_state(&self) -> &DisplayState {
        &self.display
    }

    // a failed save clears the autosave timer but leaves its retry behind
    fn has_unsaved_edits(&self) -> bool {
        self.dirty_for.is_some()
            || self.banner.as_ref().is_some_and(|b| b.retry == Some(RetryAction::Save))
    }

    fn save_or_banner(&mut self) {
        if let Err(e) = self.save() {
            warn!(error = %e, "save failed");
            self.dirty_for = None; // wait for the retry instead of hammering the store
            self.show_error(e.to_string(), Some(RetryAction::Save));
        }
    }

    fn show_error(&mut self, message: String, retry: Option<RetryAction>) {
        self.banner = Some(Banner { message, retry });
    }

    fn retry(&mut self) -> Vec<AudioCommand> {
        let Some(action) = self.banner.take().and_then(|b| b.retry) else {
            return vec![];
        };
        info!(?action, "retrying");
        match action {
            RetryAction::Play => {
                self.pending = Some(RetryAction::Play);
                vec![AudioCommand::Play]
            }
            RetryAction::Render => {
                if let Some(req) = self.last_render.clone() {
                    self.spawn_render(req);
                }
                vec![]
            }
            RetryAction::Save => {
                self.save_or_banner();
                vec![]
            }
        }
    }

    fn move_cursor(&mut self, rows: isize, steps: isize) -> Vec<AudioCommand> {
        let (r, s) = self.cursor;
        self.cursor = (
            (r as isize + rows).rem_euclid(NUM_INSTRUMENTS as isize) as usize,
            (s as isize + steps).rem_euclid(STEPS_PER_PATTERN as isize) as usize,
        );
        vec![]
    }

    fn toggle_at_cursor(&mut self) -> Vec<AudioCommand> {
        if self.source == SourceKind::Instrumental {
            self.status = "step edits are off while the instrumental plays".to_string();
            return vec![];
        }
        let (row, step) = self.cursor;
        let instrument = Instrument::ALL[row];
        match self.pattern.toggle_step(instrument, step as u8) {
            Ok(on) => debug!(%instrument, step, on, "step toggled"),
            Err(e) => {
                self.show_error(e.to_string(), None);
                return vec![];
            }
        }
        self.pattern_error = None;
        let raw = self.pattern.serialize();
        self.song_mut().beat_pattern = raw.clone();
        self.mark_dirty();

        if self.source == SourceKind::Sequencer {
            vec![AudioCommand::EditPattern(self.pattern.clone())]
        } else {
            vec![AudioCommand::LoadPattern { raw }]
        }
    }

    fn nudge_bpm(&mut self, delta: i32) -> Vec<AudioCommand> {
        let bpm = clamp_bpm(self.playback.bpm.round() + delta as f64);
        if bpm == self.playback.bpm {
            return vec![];
        }
        self.playback.bpm = bpm;
        self.song_mut().bpm = bpm as u32;
        self.mark_dirty();
        vec![AudioCommand::SetBpm(bpm)]
    }

    fn switch_source(&mut self) -> Vec<AudioCommand> {
        match (self.source, &self.instrumental) {
            (SourceKind::Instrumental, _) => vec![AudioCommand::LoadPattern {
                raw: self.pattern_text(),
            }],
            (_, Some(buffer)) => vec![AudioCommand::LoadInstrumental {
                buffer: buffer.clone(),
            }],
            (_, None) => {
                self.status = "no instrumental loaded (start with --instrumental)".to_string();
                vec![]
            }
        }
    }

    fn request_render(&mut self) {
        if self.is_busy() {
            debug!("render already running, request ignored");
            return;
        }
        let song = self
            .project
            .song_data
            .clone()
            .unwrap_or_else(|| SongData::blank(self.playback.bpm as u32));
        let file_name = artifact_file_name(&song, ArtifactKind::Audio);
        let bpm = self.playback.bpm;
        let out_dir = self.out_dir.clone();
        let req = match (self.source, &self.instrumental) {
            (SourceKind::Instrumental, Some(buffer)) => RenderRequest::Instrumental {
                buffer: buffer.clone(),
                bpm,
                out_dir,
                file_name,
            },
            _ => RenderRequest::Pattern {
                raw: self.pattern_text(),
                bpm,
                sample_rate: self.sample_rate,
                out_dir,
                file_name,
            },
        };
        self.last_render = Some(req.clone());
        self.spawn_render(req);
    }

    fn spawn_render(&mut self, req: RenderRequest) {
        let (tx, rx) = crossbeam_channel::bounded::<RenderResult>(1);
        std::thread::spawn(move || {
            let result = req.run().map_err(|e| e.to_string());
            let _ = tx.send(result);
        });
        self.render_job = Some(rx);
        self.status = "rendering...".to_string();
    }

    // the pattern as the engine should see it: the stored text while it is
    // still invalid, so loading it reports the same error again
    fn pattern_text(&self) -> String {
        match (&self.pattern_error, &self.project.song_data) {
            (Some(_), Some(song)) => song.beat_pattern.clone(),
            _ => self.pattern.serialize(),
        }
    }

    fn song_mut(&mut self) -> &mut SongData {
        let bpm = self.playback.bpm as u32;
        self.project.song_data.get_or_insert_with(|| SongData::blank(bpm))
    }

    fn mark_dirty(&mut self) {
        self.dirty_for.get_or_insert(0.0);
    }

    fn refresh_display(&mut self) {
        let d = &mut self.display;
        for inst in Instrument::ALL {
            for step in 0..STEPS_PER_PATTERN {
                let on = self.pattern.is_active(inst, step as u8);
                let under_head = self.playback.running && self.playback.current_step == Some(step as u8);
                d.leds[inst.index()][step] = match (on, under_head) {
                    _ if self.cursor == (inst.index(), step) => LedState::Blink,
                    (true, true) => LedState::OnHigh,
                    (true, false) => LedState::OnMedium,
                    _ => LedState::Off,
                };
            }
        }
        d.playing_step = if self.playback.running { self.playback.current_step } else { None };
        d.cursor = self.cursor;
        d.playing = self.playback.running;
        d.ready = self.ready;
        d.source = self.source;
        d.bpm = self.playback.bpm;
        d.project_name.clone_from(&self.project.name);
        d.song_title = self
            .project
            .song_data
            .as_ref()
            .map_or_else(String::new, |s| s.title.clone());
        d.busy = self.render_job.is_some();
        d.banner.clone_from(&self.banner);
        d.status_text.clone_from(&self.status);
    }
}

fn blank_display() -> DisplayState {
    DisplayState {
        leds: [[LedState::Off; STEPS_PER_PATTERN]; NUM_INSTRUMENTS],
        playing_step: None,
        cursor: (0, 0),
        playing: false,
        ready: false,
        source: SourceKind::None,
        bpm: PlaybackState::default().bpm,
        project_name: String::new(),
        song_title: String::new(),
        busy: false,
        banner: None,
        status_text: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use super::*;
    use crate::pipeline::persistence::{MemoryStore, ACTIVE_KEY, PROJECTS_KEY};

    fn session_with(song: Option<SongData>, out: &std::path::Path) -> Session<MemoryStore> {
        let mut store = ProjectStore::load(MemoryStore::new()).unwrap();
        let mut p = store.active().clone();
        p.song_data = song;
        store.update(p).unwrap();
        Session::new(store, out.to_path_buf(), 8_000)
    }

    fn song(pattern: &str, bpm: u32) -> SongData {
        let mut s = SongData::blank(bpm);
        s.title = "Test Song".into();
        s.beat_pattern = pattern.into();
        s
    }

    fn wait_idle<S: KeyValueStore>(s: &mut Session<S>) {
        let start = Instant::now();
        while s.is_busy() {
            assert!(start.elapsed() < Duration::from_secs(30), "render never finished");
            std::thread::sleep(Duration::from_millis(10));
            s.tick(0.01);
        }
    }

    #[test]
    fn startup_mirrors_the_project() {
        let dir = tempfile::tempdir().unwrap();
        let s = session_with(Some(song(r#"{"kick":[0]}"#, 96)), dir.path());
        let cmds = s.startup_commands();
        assert!(matches!(cmds[0], AudioCommand::SetBpm(b) if b == 96.0));
        assert!(matches!(&cmds[1], AudioCommand::LoadPattern { raw } if raw == r#"{"kick":[0]}"#));
        assert_eq!(s.display_state().leds[0][0], LedState::Blink); // cursor sits on it
        assert_eq!(s.display_state().project_name, Project::DEFAULT_NAME);
    }

    #[test]
    fn invalid_stored_pattern_shows_a_banner_and_stays_as_stored() {
        let dir = tempfile::tempdir().unwrap();
        let s = session_with(Some(song("{\"kick\":[42]}", 120)), dir.path());
        assert!(s.banner().is_some());
        assert!(s.pattern().is_empty());
        assert!(matches!(&s.startup_commands()[1], AudioCommand::LoadPattern { raw } if raw.contains("42")));
    }

    #[test]
    fn step_toggles_edit_the_project() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session_with(None, dir.path());
        s.on_engine_event(EngineEvent::Source { kind: SourceKind::Sequencer, ready: true });
        s.handle_input(InputEvent::CursorDown);
        s.handle_input(InputEvent::CursorRight);
        s.handle_input(InputEvent::CursorRight);
        let cmds = s.handle_input(InputEvent::ToggleStep);
        assert!(matches!(&cmds[..], [AudioCommand::EditPattern(p)] if p.is_active(Instrument::Snare, 2)));
        let stored = &s.project().song_data.as_ref().unwrap().beat_pattern;
        assert_eq!(stored, r#"{"snare":[2]}"#);

        s.handle_input(InputEvent::ToggleStep);
        assert!(s.pattern().is_empty());
    }

    #[test]
    fn cursor_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session_with(None, dir.path());
        s.handle_input(InputEvent::CursorLeft);
        s.handle_input(InputEvent::CursorUp);
        assert_eq!(s.display_state().cursor, (NUM_INSTRUMENTS - 1, STEPS_PER_PATTERN - 1));
    }

    #[test]
    fn steps_are_locked_under_the_instrumental() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session_with(None, dir.path())
            .with_instrumental(SampleBuffer::from_frames(vec![Default::default(); 10], 8_000));
        let cmds = s.handle_input(InputEvent::SwitchSource);
        assert!(matches!(&cmds[..], [AudioCommand::LoadInstrumental { .. }]));
        s.on_engine_event(EngineEvent::Source { kind: SourceKind::Instrumental, ready: true });
        assert!(s.handle_input(InputEvent::ToggleStep).is_empty());
        assert!(s.pattern().is_empty());
        let back = s.handle_input(InputEvent::SwitchSource);
        assert!(matches!(&back[..], [AudioCommand::LoadPattern { .. }]));
    }

    #[test]
    fn bpm_nudges_clamp_and_persist() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session_with(Some(song("{}", 239)), dir.path());
        let cmds = s.handle_input(InputEvent::NudgeBpm(5));
        assert!(matches!(cmds[..], [AudioCommand::SetBpm(b)] if b == 240.0));
        assert!(s.handle_input(InputEvent::NudgeBpm(1)).is_empty());
        s.handle_input(InputEvent::Save);
        assert_eq!(s.store().active().bpm(), 240);
    }

    #[test]
    fn quit_saves_only_unsaved_edits() {
        let mut p = Project::new("Untouched");
        p.updated_at = 1;
        let list = serde_json::to_string(&vec![p.clone()]).unwrap();
        let backend = MemoryStore::new()
            .with(PROJECTS_KEY, &list)
            .with(ACTIVE_KEY, &p.id);
        let dir = tempfile::tempdir().unwrap();
        let mut s = Session::new(ProjectStore::load(backend).unwrap(), dir.path().to_path_buf(), 8_000);

        s.handle_input(InputEvent::Quit);
        assert_eq!(s.store().active().updated_at, 1);

        s.handle_input(InputEvent::ToggleStep);
        s.handle_input(InputEvent::Quit);
        assert!(s.store().active().updated_at > 1);
        assert!(s.store().active().song_data.is_some());
    }

    #[test]
    fn failed_play_offers_a_retry() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session_with(None, dir.path());
        s.handle_input(InputEvent::TogglePlay);
        s.on_engine_event(EngineEvent::Error("nothing to play".into()));
        assert_eq!(s.banner().unwrap().retry, Some(RetryAction::Play));
        let cmds = s.handle_input(InputEvent::Retry);
        assert!(matches!(cmds[..], [AudioCommand::Play]));
        assert!(s.banner().is_none());
    }

    #[test]
    fn transport_events_drive_the_playhead() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session_with(Some(song(r#"{"hihat":[3]}"#, 120)), dir.path());
        s.on_engine_event(EngineEvent::Transport { running: true });
        s.on_engine_event(EngineEvent::Step(3));
        let d = s.display_state();
        assert_eq!(d.playing_step, Some(3));
        assert_eq!(d.leds[Instrument::Hihat.index()][3], LedState::OnHigh);
        s.on_engine_event(EngineEvent::Transport { running: false });
        assert_eq!(s.display_state().playing_step, None);
    }

    #[test]
    fn render_runs_once_at_a_time() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session_with(Some(song(r#"{"kick":[0,8]}"#, 240)), dir.path());
        s.handle_input(InputEvent::Render);
        assert!(s.display_state().busy);
        s.handle_input(InputEvent::Render); // ignored while busy
        wait_idle(&mut s);
        assert!(s.banner().is_none());
        assert!(dir.path().join("unknown_artist_test_song.flac").exists());
        assert!(s.display_state().status_text.starts_with("rendered"));
    }

    #[test]
    fn failed_render_retries_with_the_same_inputs() {
        let dir = tempfile::tempdir().unwrap();
        // a file where the output directory should be
        let blocked = dir.path().join("out");
        std::fs::write(&blocked, b"x").unwrap();
        let mut s = session_with(Some(song("{}", 240)), &blocked);
        s.handle_input(InputEvent::Render);
        wait_idle(&mut s);
        assert_eq!(s.banner().unwrap().retry, Some(RetryAction::Render));

        std::fs::remove_file(&blocked).unwrap();
        s.handle_input(InputEvent::Retry);
        wait_idle(&mut s);
        assert!(s.banner().is_none());
        assert!(blocked.join("unknown_artist_test_song.flac").exists());
    }

    #[test]
    fn edits_autosave_after_a_pause() {
        let dir = tempfile::tempdir().unwrap();
        let mut s = session_with(None, dir.path());
        s.handle_input(InputEvent::ToggleStep);
        s.tick(1.0);
        assert!(s.store().active().song_data.is_none());
        s.tick(1.5);
        let saved = s.store().active().song_data.as_ref().unwrap();
        assert_eq!(saved.beat_pattern, r#"{"kick":[0]}"#);
    }
}
