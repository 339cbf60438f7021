pub use crate::audio::{SampleBuffer, StereoFrame};
use crate::pipeline::pattern::BeatPattern;
use crate::shared::SourceKind;

#[derive(Clone, Debug)]
pub enum AudioCommand {
    // New beat source from stored pattern text. The engine tears the current
    // source down before arming the new sequencer.
    LoadPattern { raw: String },

    // Step edits on the loaded sequencer; playback keeps going
    EditPattern(BeatPattern),

    // The engine can't touch the filesystem (interrupts the audio thread), so
    // the asset is decoded beforehand (see loader/sample_loader.rs)
    LoadInstrumental { buffer: SampleBuffer },

    ClearSource,
    Play,
    Stop,
    TogglePlay,
    SetBpm(f64),
}

// What the engine reports back. Step events come out of the same loop
// iteration that fires the voices for that step.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineEvent {
    Step(u8),
    Transport { running: bool },
    Source { kind: SourceKind, ready: bool },
    Error(String),
}
