//! Input classification (§4.2.1).

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum InputError {
    #[error("stage requires at least one bead id")]
    Empty,
    #[error("argument `{0}` looks like a CLI flag, not a bead id")]
    LooksLikeFlag(String),
    #[error("mixed input types: an epic cannot be staged alongside other beads")]
    MixedTypes,
    #[error("only one epic may be staged at a time")]
    MultipleEpics,
}

/// The three shapes a stage request can take, before the bead store is
/// consulted to learn what type each id actually is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageInput {
    Epic(String),
    Convoy(String),
    Tasks(Vec<String>),
}

/// Classify raw CLI-ish arguments into a `StageInput`, without yet knowing
/// the bead types — that's §4.2.2's job once ids are resolved against the
/// store. This pass only rejects shapes that are malformed regardless of
/// what the ids turn out to be.
pub fn classify(args: &[String]) -> Result<Vec<String>, InputError> {
    if args.is_empty() {
        return Err(InputError::Empty);
    }
    for arg in args {
        if arg.starts_with('-') || arg.starts_with("--") {
            return Err(InputError::LooksLikeFlag(arg.clone()));
        }
    }
    Ok(args.to_vec())
}

/// Given the resolved bead types for each input id (as `(id, is_epic,
/// is_convoy)` triples), decide the final `StageInput` shape. Called after
/// the beads have been fetched once so the classifier can see real types.
pub fn resolve(ids: &[String], is_epic: impl Fn(&str) -> bool, is_convoy: impl Fn(&str) -> bool) -> Result<StageInput, InputError> {
    let epics: Vec<&String> = ids.iter().filter(|id| is_epic(id)).collect();
    let convoys: Vec<&String> = ids.iter().filter(|id| is_convoy(id)).collect();

    if !epics.is_empty() && epics.len() != ids.len() {
        return Err(InputError::MixedTypes);
    }
    if !convoys.is_empty() && convoys.len() != ids.len() {
        return Err(InputError::MixedTypes);
    }
    if epics.len() > 1 {
        return Err(InputError::MultipleEpics);
    }
    if convoys.len() > 1 {
        return Err(InputError::MixedTypes);
    }

    if let Some(epic) = epics.first() {
        return Ok(StageInput::Epic((*epic).clone()));
    }
    if let Some(convoy) = convoys.first() {
        return Ok(StageInput::Convoy((*convoy).clone()));
    }
    Ok(StageInput::Tasks(ids.to_vec()))
}
