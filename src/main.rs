use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{crate_version, Parser, Subcommand};
use crossterm::terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::Terminal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use hitgrid::config::{self, Settings};
use hitgrid::pipeline::export::{self, ArtifactKind};
use hitgrid::pipeline::pattern::BeatPattern;
use hitgrid::pipeline::persistence::{FileStore, KeyValueStore, ProjectStore};
use hitgrid::pipeline::project::{Project, SongData};
use hitgrid::pipeline::render;
use hitgrid::session::Session;
use hitgrid::shared::{clamp_bpm, InputEvent, Instrument, STEPS_PER_PATTERN};
use hitgrid::{audio, loader, tui};

#[derive(Parser)]
#[clap(version = crate_version!(), about = "A 16-step drum sketchpad for generated songs.")]
struct Cli {
    /// Where projects, settings and the log live. Defaults to ./.hitgrid
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// Settings file. Defaults to <data-dir>/hitgrid.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists and manages projects.
    Projects {
        #[clap(subcommand)]
        action: ProjectsCmd,
    },
    /// Imports a generated song (JSON, optionally fenced) into the active project.
    Import { file: PathBuf },
    /// Shows or edits the active project's beat pattern.
    Pattern {
        #[clap(subcommand)]
        action: PatternCmd,
    },
    /// Sets the active project's tempo.
    Bpm { value: f64 },
    /// Renders the active project to a FLAC file.
    Render {
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Render this instrumental instead of the beat pattern.
        #[arg(short, long)]
        instrumental: Option<PathBuf>,
    },
    /// Writes lyrics, style guide and song JSON for the active project.
    Export {
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Prints a share link for the active project.
    Share {
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Opens the step grid with live audio.
    Play {
        /// Offer this WAV as the alternative source.
        #[arg(short, long)]
        instrumental: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ProjectsCmd {
    List,
    Create {
        name: String,
        #[arg(long)]
        activate: bool,
    },
    Delete { id: String },
    Select { id: String },
}

#[derive(Subcommand)]
enum PatternCmd {
    Show,
    Toggle { instrument: Instrument, step: u8 },
    Set { json: String },
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let data_dir = config::data_dir(cli.data_dir);
    let settings_path = cli.config.unwrap_or_else(|| data_dir.join(config::SETTINGS_FILE));
    let settings = Settings::load(Some(&settings_path)).context("failed to load settings")?;

    let interactive = matches!(cli.command, Commands::Play { .. });
    init_logging(&settings, &data_dir, interactive)?;

    let mut store = ProjectStore::open(&data_dir)
        .with_context(|| format!("failed to open project store in {}", data_dir.display()))?;

    match cli.command {
        Commands::Projects { action } => projects(&mut store, action),
        Commands::Import { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            println!("{}", import_song(&mut store, &raw)?);
            Ok(())
        }
        Commands::Pattern { action } => pattern(&mut store, action, settings.default_bpm),
        Commands::Bpm { value } => {
            let bpm = clamp_bpm(value).round() as u32;
            let mut project = store.active().clone();
            song_or_blank(&mut project, settings.default_bpm).bpm = bpm;
            store.update(project)?;
            println!("{bpm} BPM");
            Ok(())
        }
        Commands::Render { out, instrumental } => {
            let project = store.active();
            let song = project.song_data.clone().unwrap_or_else(|| SongData::blank(settings.default_bpm));
            let bpm = song.bpm as f64;
            let rendered = match instrumental {
                Some(path) => render::render_instrumental(&loader::sample_loader::load(&path, settings.sample_rate)?, bpm)?,
                None => render::render_pattern_text(&song.beat_pattern, bpm, settings.sample_rate)?,
            };
            let dir = out.unwrap_or_else(|| data_dir.join("renders"));
            let path = rendered.write_to(&dir, &export::artifact_file_name(&song, ArtifactKind::Audio))?;
            println!("{} ({:.1}s)", path.display(), rendered.duration_secs());
            Ok(())
        }
        Commands::Export { out } => {
            let song = active_song(store.active())?;
            let dir = out.unwrap_or_else(|| data_dir.join("exports"));
            for path in export::export_text_artifacts(&dir, song)? {
                println!("{}", path.display());
            }
            Ok(())
        }
        Commands::Share { base_url } => {
            let song = active_song(store.active())?;
            let base = base_url.unwrap_or(settings.share_base_url);
            println!("{}", export::share_link(&base, song)?);
            Ok(())
        }
        Commands::Play { instrumental } => play(store, &data_dir, instrumental),
    }
}

// stderr for one-shot commands; a file while the TUI owns the screen
fn init_logging(settings: &Settings, data_dir: &Path, interactive: bool) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    if interactive {
        std::fs::create_dir_all(data_dir)?;
        let log_path = data_dir.join(config::LOG_FILE);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("failed to open log file {}", log_path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn projects(store: &mut ProjectStore<FileStore>, action: ProjectsCmd) -> anyhow::Result<()> {
    match action {
        ProjectsCmd::List => {
            for p in store.projects() {
                let marker = if p.id == store.active_id() { "*" } else { " " };
                let title = p.song_data.as_ref().map_or("-", |s| s.title.as_str());
                println!("{marker} {}  {}  ({title})", p.id, p.name);
            }
        }
        ProjectsCmd::Create { name, activate } => {
            let p = store.create(&name, activate)?;
            println!("{}", p.id);
        }
        ProjectsCmd::Delete { id } => {
            store.delete(&id)?;
            println!("active: {}", store.active().name);
        }
        ProjectsCmd::Select { id } => {
            store.set_active(&id)?;
            println!("active: {}", store.active().name);
        }
    }
    Ok(())
}

fn pattern(store: &mut ProjectStore<FileStore>, action: PatternCmd, default_bpm: u32) -> anyhow::Result<()> {
    let mut project = store.active().clone();
    let song = song_or_blank(&mut project, default_bpm);
    let mut pattern = BeatPattern::parse(&song.beat_pattern)
        .with_context(|| format!("stored pattern of {} is invalid", project.name))?;
    match action {
        PatternCmd::Show => {
            print_grid(&pattern);
            return Ok(());
        }
        PatternCmd::Toggle { instrument, step } => {
            pattern.toggle_step(instrument, step)?;
        }
        PatternCmd::Set { json } => {
            pattern = BeatPattern::parse(&json)?;
        }
    }
    song_or_blank(&mut project, default_bpm).beat_pattern = pattern.serialize();
    store.update(project)?;
    print_grid(&pattern);
    Ok(())
}

/// Store the song on the active project. The confirmation is only built
/// once the store has accepted the write.
fn import_song<S: KeyValueStore>(store: &mut ProjectStore<S>, raw: &str) -> anyhow::Result<String> {
    let song = SongData::from_upstream(raw)?;
    let mut project = store.active().clone();
    project.song_data = Some(song);
    let saved = store.update(project)?;
    let song = active_song(&saved)?;
    Ok(format!("imported \"{}\" by {} into {}", song.title, song.artist_name, saved.name))
}

fn print_grid(pattern: &BeatPattern) {
    for inst in Instrument::ALL {
        let cells: String = (0..STEPS_PER_PATTERN as u8)
            .map(|s| if pattern.is_active(inst, s) { 'x' } else { '.' })
            .collect();
        println!("{:<6} {cells}", inst.label());
    }
}

fn song_or_blank(project: &mut Project, default_bpm: u32) -> &mut SongData {
    project.song_data.get_or_insert_with(|| SongData::blank(default_bpm))
}

fn active_song(project: &Project) -> anyhow::Result<&SongData> {
    project
        .song_data
        .as_ref()
        .with_context(|| format!("project {} has no song yet (try `hitgrid import`)", project.name))
}

fn play(store: ProjectStore<FileStore>, data_dir: &Path, instrumental: Option<PathBuf>) -> anyhow::Result<()> {
    let bpm = clamp_bpm(store.active().bpm() as f64);
    let audio = audio::start_audio(bpm)?;
    let mut session = Session::new(store, data_dir.join("renders"), audio.sample_rate());
    if let Some(path) = instrumental {
        session = session.with_instrumental(loader::sample_loader::load(&path, audio.sample_rate())?);
    }
    for cmd in session.startup_commands() {
        audio.send(cmd);
    }

    terminal::enable_raw_mode()?;
    let _guard = RawModeGuard; // auto drops when out of scope
    let backend = CrosstermBackend::new(std::io::stdout());
    let mut term = Terminal::new(backend)?;
    term.clear()?;
    info!("session started");

    let tick_rate = Duration::from_millis(16); // ~60fps
    let mut last_tick = Instant::now();
    let blink_start = Instant::now();

    loop {
        for event in audio.poll_events() {
            session.on_engine_event(event);
        }

        let blink_on = (blink_start.elapsed().as_millis() / 250) % 2 == 0;
        let ds = session.display_state().clone();
        term.draw(|frame| {
            tui::view::render(frame, frame.area(), &ds, blink_on);
        })?;

        for event in tui::input::poll_input(tick_rate)? {
            let quit = event == InputEvent::Quit;
            for cmd in session.handle_input(event) {
                audio.send(cmd);
            }
            if quit {
                term.clear()?;
                info!("session ended");
                return Ok(());
            }
        }

        let elapsed = last_tick.elapsed().as_secs_f64();
        last_tick = Instant::now();
        session.tick(elapsed);
    }
}

struct RawModeGuard;
impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = terminal::disable_raw_mode();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SONG: &str = r#"{"title":"Night Drive","artistName":"Low Sun","bpm":96}"#;

    #[test]
    fn import_confirms_a_stored_song() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = ProjectStore::open(dir.path()).unwrap();
        let msg = import_song(&mut store, SONG).unwrap();
        assert_eq!(msg, format!("imported \"Night Drive\" by Low Sun into {}", Project::DEFAULT_NAME));
        assert_eq!(store.active().bpm(), 96);
    }

    #[test]
    fn import_reports_nothing_when_the_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let data = dir.path().join("data");
        let mut store = ProjectStore::open(&data).unwrap();
        std::fs::remove_dir_all(&data).unwrap();

        assert!(import_song(&mut store, SONG).is_err());
        assert!(store.active().song_data.is_none());
    }
}
