//! Media type negotiation.
//!
//! Candidates are enumerated by index until the engine reports
//! `NoMoreTypes`, scored by the decoder hooks, and the winner is committed.
//! An engine that cannot enumerate gets a type synthesized by the hooks
//! instead. An engine may also refuse one direction until the other is
//! set (`TypeNotSet`), which [`negotiate`] resolves by committing input,
//! then output, then input again.

use std::fmt;

use crate::engine::{Engine, EngineError, EngineResult, MediaType};
use crate::error::{BridgeError, Result};
use crate::transform::DecoderHooks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Input => f.write_str("input"),
            Direction::Output => f.write_str("output"),
        }
    }
}

/// Outcome of enumerating one direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Chosen { media_type: MediaType, index: u32 },
    /// Nothing enumerable; the caller synthesizes a type.
    Empty,
    /// The other direction has to be set first.
    Later,
    /// Types were offered but every one scored below zero.
    Rejected { offered: u32 },
    /// The requested index lies past the end of the offered types.
    OutOfRange { index: u32, offered: u32 },
}

/// Enumerates candidates through `enumerate` and picks one.
///
/// Without `explicit_index` the highest score wins and ties keep the first
/// candidate seen. Negative scores are never chosen. Engine handle loss is
/// the only error returned; every other enumeration failure yields
/// [`Selection::Empty`].
pub fn select_type<E, S>(mut enumerate: E, score: S, explicit_index: Option<u32>) -> EngineResult<Selection>
where
    E: FnMut(u32) -> EngineResult<MediaType>,
    S: Fn(&MediaType) -> i32,
{
    let mut best: Option<(MediaType, u32)> = None;
    let mut best_score = -1;
    let mut index = 0u32;
    loop {
        let candidate = match enumerate(index) {
            Ok(mt) => mt,
            Err(EngineError::NoMoreTypes) => break,
            Err(EngineError::TypeNotSet) => return Ok(Selection::Later),
            Err(EngineError::HandleLost) => return Err(EngineError::HandleLost),
            Err(EngineError::NotImplemented) => return Ok(Selection::Empty),
            Err(e) => {
                log::debug!("type enumeration stopped at {}: {}", index, e);
                return Ok(Selection::Empty);
            }
        };

        match explicit_index {
            Some(wanted) if wanted == index => {
                return Ok(Selection::Chosen {
                    media_type: candidate,
                    index,
                })
            }
            Some(_) => {}
            None => {
                let s = score(&candidate);
                log::trace!("candidate {} scored {}: {}", index, s, candidate);
                if s > best_score {
                    best_score = s;
                    best = Some((candidate, index));
                }
            }
        }
        index += 1;
    }

    Ok(match (best, explicit_index) {
        (Some((media_type, index)), _) => Selection::Chosen { media_type, index },
        (None, _) if index == 0 => Selection::Empty,
        (None, Some(wanted)) => Selection::OutOfRange {
            index: wanted,
            offered: index,
        },
        (None, None) => Selection::Rejected { offered: index },
    })
}

/// Result of committing one direction.
#[derive(Debug, Clone, PartialEq)]
pub enum Commit {
    /// The type as re-read from the engine.
    Committed(MediaType),
    Later,
}

/// Selects, configures, sets and re-reads the type of one stream.
pub fn commit<H>(
    engine: &mut dyn Engine,
    hooks: &H,
    direction: Direction,
    stream: u32,
    explicit_index: Option<u32>,
) -> Result<Commit>
where
    H: DecoderHooks + ?Sized,
{
    let selection = match direction {
        Direction::Input => select_type(
            |i| engine.input_available_type(stream, i),
            |t| hooks.score_input_type(t),
            explicit_index,
        ),
        Direction::Output => select_type(
            |i| engine.output_available_type(stream, i),
            |t| hooks.score_output_type(t),
            explicit_index,
        ),
    }
    .map_err(|e| failure(direction, "enumeration", e))?;

    let mut media_type = match selection {
        Selection::Later => {
            log::debug!("{} type not determinable yet", direction);
            return Ok(Commit::Later);
        }
        Selection::Rejected { offered } => {
            return Err(BridgeError::Negotiation(format!(
                "all {} offered {} types were rejected",
                offered, direction
            )));
        }
        Selection::OutOfRange { index, offered } => {
            return Err(BridgeError::Negotiation(format!(
                "{} type index {} is past the {} offered types",
                direction, index, offered
            )));
        }
        Selection::Chosen { media_type, index } => {
            log::debug!("{} type {} selected", direction, index);
            media_type
        }
        Selection::Empty => {
            log::debug!("engine does not enumerate {} types, synthesizing", direction);
            MediaType::new()
        }
    };

    match direction {
        Direction::Input => hooks.configure_input_type(&mut media_type)?,
        Direction::Output => hooks.configure_output_type(&mut media_type)?,
    }

    let set = match direction {
        Direction::Input => engine.set_input_type(stream, &media_type),
        Direction::Output => engine.set_output_type(stream, &media_type),
    };
    match set {
        Ok(()) => {}
        Err(EngineError::TypeNotSet) => {
            log::debug!("{} type commit deferred", direction);
            return Ok(Commit::Later);
        }
        Err(e) => return Err(failure(direction, "commit", e)),
    }

    let current = match direction {
        Direction::Input => engine.input_current_type(stream),
        Direction::Output => engine.output_current_type(stream),
    }
    .map_err(|e| failure(direction, "read back", e))?;
    log::debug!("{} type committed:\n{}", direction, current);
    Ok(Commit::Committed(current))
}

/// Both committed types of a negotiated engine.
#[derive(Debug, Clone, PartialEq)]
pub struct Negotiated {
    pub input: MediaType,
    pub output: MediaType,
}

/// Commits input, then output, retrying input if it was deferred.
pub fn negotiate<H>(
    engine: &mut dyn Engine,
    hooks: &H,
    ids: (u32, u32),
    input_index: Option<u32>,
    output_index: Option<u32>,
) -> Result<Negotiated>
where
    H: DecoderHooks + ?Sized,
{
    let (input_id, output_id) = ids;
    let first = commit(engine, hooks, Direction::Input, input_id, input_index)?;

    let output = match commit(engine, hooks, Direction::Output, output_id, output_index)? {
        Commit::Committed(mt) => mt,
        Commit::Later => {
            return Err(BridgeError::Negotiation(
                "output type deferred as well as input".into(),
            ))
        }
    };

    let input = match first {
        Commit::Committed(mt) => mt,
        Commit::Later => match commit(engine, hooks, Direction::Input, input_id, input_index)? {
            Commit::Committed(mt) => mt,
            Commit::Later => {
                return Err(BridgeError::Negotiation(
                    "input type still deferred after output commit".into(),
                ))
            }
        },
    };
    Ok(Negotiated { input, output })
}

fn failure(direction: Direction, step: &str, e: EngineError) -> BridgeError {
    if e.is_handle_loss() {
        BridgeError::Fatal(format!("{} type {}: {}", direction, step, e))
    } else {
        BridgeError::Negotiation(format!("{} type {} failed: {}", direction, step, e))
    }
}
