#![allow(clippy::missing_errors_doc)]

use std::{error::Error, fmt};

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use serde::{Deserialize, Serialize};
use symbol_siege_core::SymbolKey;

const SNAPSHOT_DOMAIN: &str = "siege";
const SNAPSHOT_VERSION: &str = "v1";

/// Identifier prefix emitted before the encoded snapshot payload.
pub(crate) const SNAPSHOT_HEADER: &str = "siege:v1";
/// Delimiter used to separate the prefix, progress dimensions and payload.
const FIELD_DELIMITER: char = ':';

/// Snapshot of a player's progress through a problem, suitable for clipboard
/// transfer between runs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub(crate) struct ProgressSnapshot {
    /// Number of solution steps in the problem.
    pub step_count: u32,
    /// Step that was accepting reveals when the snapshot was taken.
    pub active_step: u32,
    /// Literal text of every solution step, in order.
    pub steps: Vec<String>,
    /// Symbols the player had revealed, in key order. A symbol sitting
    /// stolen at snapshot time resumes as placed; its theft cannot be
    /// replayed without the worm that carried it out.
    pub revealed: Vec<SymbolKey>,
}

impl ProgressSnapshot {
    /// Encodes the snapshot into a single-line string.
    #[must_use]
    pub(crate) fn encode(&self) -> String {
        let payload = SerializableSnapshot {
            steps: self.steps.clone(),
            revealed: self.revealed.clone(),
        };
        let json =
            serde_json::to_vec(&payload).expect("progress snapshot serialization never fails");
        let encoded = STANDARD_NO_PAD.encode(json);
        format!(
            "{SNAPSHOT_HEADER}:{}x{}:{encoded}",
            self.step_count, self.active_step
        )
    }

    /// Decodes a snapshot from the provided string representation.
    pub(crate) fn decode(value: &str) -> Result<Self, ProgressTransferError> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(ProgressTransferError::EmptyPayload);
        }

        let mut parts = trimmed.split(FIELD_DELIMITER);
        let domain = parts.next().ok_or(ProgressTransferError::MissingPrefix)?;
        let version = parts.next().ok_or(ProgressTransferError::MissingVersion)?;
        let dimensions = parts
            .next()
            .ok_or(ProgressTransferError::MissingDimensions)?;
        let payload = parts.next().ok_or(ProgressTransferError::MissingPayload)?;

        if domain != SNAPSHOT_DOMAIN {
            return Err(ProgressTransferError::InvalidPrefix(domain.to_owned()));
        }
        if version != SNAPSHOT_VERSION {
            return Err(ProgressTransferError::UnsupportedVersion(
                version.to_owned(),
            ));
        }

        let (step_count, active_step) = parse_dimensions(dimensions)?;
        let bytes = STANDARD_NO_PAD
            .decode(payload.as_bytes())
            .map_err(ProgressTransferError::InvalidEncoding)?;
        let decoded: SerializableSnapshot =
            serde_json::from_slice(&bytes).map_err(ProgressTransferError::InvalidPayload)?;

        if decoded.steps.len() != step_count as usize {
            return Err(ProgressTransferError::StepMismatch {
                declared: step_count,
                found: decoded.steps.len(),
            });
        }

        Ok(Self {
            step_count,
            active_step,
            steps: decoded.steps,
            revealed: decoded.revealed,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct SerializableSnapshot {
    steps: Vec<String>,
    revealed: Vec<SymbolKey>,
}

/// Errors that can occur while decoding progress transfer strings.
#[derive(Debug)]
pub(crate) enum ProgressTransferError {
    /// The provided string was empty or contained only whitespace.
    EmptyPayload,
    /// The prefix segment was missing from the encoded snapshot.
    MissingPrefix,
    /// The encoded snapshot did not contain a version segment.
    MissingVersion,
    /// The encoded snapshot did not include progress dimensions.
    MissingDimensions,
    /// The encoded snapshot did not include the payload segment.
    MissingPayload,
    /// The encoded snapshot used an unexpected prefix segment.
    InvalidPrefix(String),
    /// The encoded snapshot used an unsupported version identifier.
    UnsupportedVersion(String),
    /// The progress dimensions could not be parsed from the encoded snapshot.
    InvalidDimensions(String),
    /// The declared step count disagreed with the payload.
    StepMismatch {
        /// Step count named by the dimensions segment.
        declared: u32,
        /// Number of steps actually present in the payload.
        found: usize,
    },
    /// The base64 payload could not be decoded.
    InvalidEncoding(base64::DecodeError),
    /// The decoded payload could not be deserialised.
    InvalidPayload(serde_json::Error),
}

impl fmt::Display for ProgressTransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPayload => write!(f, "clipboard payload was empty"),
            Self::MissingPrefix => write!(f, "progress string is missing the prefix"),
            Self::MissingVersion => write!(f, "progress string is missing the version"),
            Self::MissingDimensions => {
                write!(f, "progress string is missing the progress dimensions")
            }
            Self::MissingPayload => write!(f, "progress string is missing the payload"),
            Self::InvalidPrefix(prefix) => {
                write!(f, "progress prefix '{prefix}' is not supported")
            }
            Self::UnsupportedVersion(version) => {
                write!(f, "progress version '{version}' is not supported")
            }
            Self::InvalidDimensions(dimensions) => {
                write!(f, "could not parse progress dimensions '{dimensions}'")
            }
            Self::StepMismatch { declared, found } => {
                write!(
                    f,
                    "progress declares {declared} steps but the payload holds {found}"
                )
            }
            Self::InvalidEncoding(error) => {
                write!(f, "could not decode progress payload: {error}")
            }
            Self::InvalidPayload(error) => {
                write!(f, "could not parse progress payload: {error}")
            }
        }
    }
}

impl Error for ProgressTransferError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidEncoding(error) => Some(error),
            Self::InvalidPayload(error) => Some(error),
            _ => None,
        }
    }
}

fn parse_dimensions(dimensions: &str) -> Result<(u32, u32), ProgressTransferError> {
    let (step_count, active_step) = dimensions
        .split_once(['x', 'X'])
        .ok_or_else(|| ProgressTransferError::InvalidDimensions(dimensions.to_owned()))?;

    let step_count = step_count
        .trim()
        .parse::<u32>()
        .map_err(|_| ProgressTransferError::InvalidDimensions(dimensions.to_owned()))?;
    let active_step = active_step
        .trim()
        .parse::<u32>()
        .map_err(|_| ProgressTransferError::InvalidDimensions(dimensions.to_owned()))?;

    if step_count == 0 || active_step > step_count {
        return Err(ProgressTransferError::InvalidDimensions(
            dimensions.to_owned(),
        ));
    }

    Ok((step_count, active_step))
}
