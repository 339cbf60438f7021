// Beat patterns: which of the 16 steps each drum plays, plus the JSON text
// form used for storage and for talking to the generator.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::shared::{Instrument, STEPS_PER_PATTERN};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatternError {
    #[error("malformed beat pattern: {0}")]
    Malformed(String),
    #[error("step {step} for {instrument} is outside 0..16")]
    StepOutOfRange { instrument: String, step: i64 },
}

/// Removes a markdown code fence (```` ``` ```` or ```` ```json ````) wrapped
/// around a generated JSON payload. Text without a fence is only trimmed.
pub fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // info string ("json", "JSON", ...) sits right after the opening fence
    let body = rest.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim()
}

/// Per-instrument step sets. Instruments with no steps are not stored at all,
/// so "absent" and "empty" are the same pattern.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct BeatPattern {
    steps: BTreeMap<Instrument, BTreeSet<u8>>,
}

impl BeatPattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(raw: &str) -> Result<Self, PatternError> {
        let body = strip_code_fence(raw);
        let value: Value =
            serde_json::from_str(body).map_err(|e| PatternError::Malformed(e.to_string()))?;
        Self::from_json_value(&value)
    }

    /// Parse, degrading to the silent pattern on failure. The error is handed
    /// back so the caller can show it once.
    pub fn parse_or_empty(raw: &str) -> (Self, Option<PatternError>) {
        match Self::parse(raw) {
            Ok(p) => (p, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }

    pub fn from_json_value(value: &Value) -> Result<Self, PatternError> {
        let obj = value
            .as_object()
            .ok_or_else(|| PatternError::Malformed("expected a JSON object".to_string()))?;

        let mut pattern = BeatPattern::default();
        for (key, steps) in obj {
            let instrument = match key.parse::<Instrument>() {
                Ok(i) => i,
                Err(_) => {
                    warn!(key = %key, "ignoring unknown instrument in beat pattern");
                    continue;
                }
            };
            let list = steps.as_array().ok_or_else(|| {
                PatternError::Malformed(format!("steps for '{key}' must be an array"))
            })?;

            let mut set = BTreeSet::new();
            for s in list {
                let n = s.as_i64().ok_or_else(|| {
                    PatternError::Malformed(format!("step {s} for '{key}' is not an integer"))
                })?;
                if !(0..STEPS_PER_PATTERN as i64).contains(&n) {
                    return Err(PatternError::StepOutOfRange {
                        instrument: instrument.to_string(),
                        step: n,
                    });
                }
                set.insert(n as u8);
            }
            if !set.is_empty() {
                pattern.steps.entry(instrument).or_default().extend(set);
            }
        }
        Ok(pattern)
    }

    /// Canonical compact JSON: instruments in kick/snare/hihat/clap order,
    /// steps ascending.
    pub fn serialize(&self) -> String {
        // string keys and integer sets, so encoding has nothing to reject
        serde_json::to_string(self).unwrap_or_else(|e| {
            warn!(error = %e, "beat pattern failed to encode, storing it empty");
            "{}".to_string()
        })
    }

    /// Flip one cell. Returns whether the step is set afterwards.
    pub fn toggle_step(&mut self, instrument: Instrument, step: u8) -> Result<bool, PatternError> {
        check_step(instrument, step)?;
        let set = self.steps.entry(instrument).or_default();
        let now_on = if set.remove(&step) {
            false
        } else {
            set.insert(step);
            true
        };
        if set.is_empty() {
            self.steps.remove(&instrument);
        }
        Ok(now_on)
    }

    /// Builder used by tests and the CLI.
    pub fn with_steps(mut self, instrument: Instrument, steps: &[u8]) -> Result<Self, PatternError> {
        for &step in steps {
            check_step(instrument, step)?;
        }
        if !steps.is_empty() {
            self.steps.entry(instrument).or_default().extend(steps.iter().copied());
        }
        Ok(self)
    }

    pub fn is_active(&self, instrument: Instrument, step: u8) -> bool {
        self.steps.get(&instrument).is_some_and(|s| s.contains(&step))
    }

    pub fn steps(&self, instrument: Instrument) -> impl Iterator<Item = u8> + '_ {
        self.steps.get(&instrument).into_iter().flat_map(|s| s.iter().copied())
    }

    /// Instruments that fire on `step`, in instrument order.
    pub fn instruments_at(&self, step: u8) -> impl Iterator<Item = Instrument> + '_ {
        self.steps
            .iter()
            .filter(move |(_, set)| set.contains(&step))
            .map(|(inst, _)| *inst)
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

fn check_step(instrument: Instrument, step: u8) -> Result<(), PatternError> {
    if (step as usize) < STEPS_PER_PATTERN {
        Ok(())
    } else {
        Err(PatternError::StepOutOfRange {
            instrument: instrument.to_string(),
            step: step as i64,
        })
    }
}

impl fmt::Display for BeatPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

// Deserializing always goes through the validating path.
impl<'de> Deserialize<'de> for BeatPattern {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        BeatPattern::from_json_value(&value).map_err(serde::de::Error::custom)
    }
}
