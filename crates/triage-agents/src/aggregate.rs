//! Pure merge of settled workflow branches into one record.
//!
//! No I/O, no retries, deterministic given its inputs. The merge contract
//! is strict: a duplicate or missing classification dimension is a
//! programmer error and is rejected instead of last-entry-wins data loss.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{BranchResult, Classification, Dimension, DimensionResult, GenerationResult};

/// Rejections from [`aggregate`]. These indicate a bug in the caller, not
/// an external-service failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregateError {
    #[error("duplicate classification dimension: {0}")]
    DuplicateDimension(Dimension),

    #[error("missing classification dimension: {0}")]
    MissingDimension(Dimension),

    #[error("label for dimension {expected} belongs to dimension {actual}")]
    LabelDimensionMismatch {
        expected: Dimension,
        actual: Dimension,
    },
}

/// The merged record handed to the escalation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregated {
    /// The generation outcome; an unavailable generation branch is
    /// normalized to a refusal so the escalation policy sees one shape.
    pub generation: GenerationResult,
    /// One entry per dimension, in canonical order regardless of the
    /// order branches completed in.
    pub classifications: Vec<DimensionResult>,
}

/// Merge the generation branch and the classification branches.
///
/// `classifications` may arrive in any completion order; the output order
/// is always [`Dimension::ALL`]. Every dimension must be present exactly
/// once (an `Unavailable` settlement counts as present).
pub fn aggregate(
    generation: BranchResult<GenerationResult>,
    classifications: Vec<(Dimension, BranchResult<Classification>)>,
) -> Result<Aggregated, AggregateError> {
    for (dimension, outcome) in &classifications {
        let duplicates = classifications
            .iter()
            .filter(|(d, _)| d == dimension)
            .count();
        if duplicates > 1 {
            return Err(AggregateError::DuplicateDimension(*dimension));
        }
        if let BranchResult::Ready(c) = outcome {
            if c.label.dimension() != *dimension {
                return Err(AggregateError::LabelDimensionMismatch {
                    expected: *dimension,
                    actual: c.label.dimension(),
                });
            }
        }
    }

    let mut ordered = Vec::with_capacity(Dimension::ALL.len());
    for dimension in Dimension::ALL {
        let outcome = classifications
            .iter()
            .find(|(d, _)| *d == dimension)
            .map(|(_, o)| o.clone())
            .ok_or(AggregateError::MissingDimension(dimension))?;
        ordered.push(DimensionResult { dimension, outcome });
    }

    let generation = match generation {
        BranchResult::Ready(g) => g,
        BranchResult::Unavailable(reason) => {
            GenerationResult::refused(format!("generation unavailable: {reason}"))
        }
    };

    Ok(Aggregated {
        generation,
        classifications: ordered,
    })
}
