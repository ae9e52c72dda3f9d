// =============================================================================
// error.rs — THE TAXONOMY OF THINGS GOING WRONG
// =============================================================================
//
// Every way this engine can disappoint a caller, catalogued with the rigor
// of a city transit complaints department. Four domain categories plus one
// "something caught fire internally" bucket:
//
// - NotFound:     you asked about a bus/route/stop/report/rider we've never
//                 heard of. Check your id and try again.
// - Precondition: the thing exists but isn't ready. A bus with no GPS fix
//                 has no ETA, no matter how nicely you ask.
// - Conflict:     the thing exists TOO much. Duplicate bus numbers, repeat
//                 complaints, or prodding a report that already reached its
//                 final verdict.
// - Validation:   the input was nonsense. Latitude 973 is not a place.
// - Internal:     our fault. The caller gets a generic apology; the logs
//                 get the gory details.
//
// Domain errors are recovered at the engine boundary and surfaced as a
// structured (kind, message) failure. They never crash the process — a late
// bus is not worth a panic.
// =============================================================================

use thiserror::Error;

/// Result alias used throughout the engine.
pub type EngineResult<T> = Result<T, EngineError>;

/// The full failure taxonomy. Everything a workflow call can throw at you.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// An id that resolves to nothing. Carries the entity kind ("bus",
    /// "route", ...) and the offending id so the message is actually useful.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// The operation needs data that hasn't arrived yet — most commonly a
    /// bus that exists but has never reported a position.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A mutation that collides with existing state: duplicate unique keys,
    /// or touching a report that is already in a terminal state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Malformed input. Caught before it can pollute the registries.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Unexpected internal failure. Logged in full, surfaced in generic form
    /// so we don't leak our plumbing to strangers.
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    /// Convenience constructor for the most common failure in the system.
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        EngineError::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable kind string, used by the gateway when it
    /// serializes a failure. These strings are part of the wire contract —
    /// the web app matches on them, so don't get creative.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::NotFound { .. } => "not_found",
            EngineError::Precondition(_) => "precondition_failed",
            EngineError::Conflict(_) => "conflict",
            EngineError::Validation(_) => "validation_error",
            EngineError::Internal(_) => "internal_error",
        }
    }

    /// The message a caller is allowed to see. Internal errors get the
    /// generic treatment; everything else is already caller-safe.
    pub fn public_message(&self) -> String {
        match self {
            EngineError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_strings_are_stable() {
        assert_eq!(EngineError::not_found("bus", "b-1").kind(), "not_found");
        assert_eq!(
            EngineError::Precondition("no fix".into()).kind(),
            "precondition_failed"
        );
        assert_eq!(EngineError::Conflict("dup".into()).kind(), "conflict");
        assert_eq!(
            EngineError::Validation("bad lat".into()).kind(),
            "validation_error"
        );
    }

    #[test]
    fn test_internal_errors_are_redacted() {
        let err = EngineError::Internal("redis exploded at 3am".into());
        assert_eq!(err.public_message(), "internal error");
        // The Display impl keeps the detail for the logs.
        assert!(err.to_string().contains("redis exploded"));
    }

    #[test]
    fn test_not_found_message_names_the_entity() {
        let err = EngineError::not_found("route", "r-42");
        assert_eq!(err.to_string(), "route not found: r-42");
    }
}
