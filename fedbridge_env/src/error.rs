//! Error types reported by the bus collaborator.

use thiserror::Error;

/// Errors an RTI service call can report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RtiError {
    /// The RTI could not be reached at the given address
    #[error("RTI unreachable at {0}")]
    Unreachable(String),

    /// A call was made before `connect` or after `disconnect`
    #[error("Not connected to the RTI")]
    NotConnected,

    /// The named federation execution does not exist (yet)
    #[error("Federation execution does not exist: {0}")]
    FederationNotFound(String),

    /// `create_federation_execution` found an existing execution
    #[error("Federation execution already exists: {0}")]
    FederationAlreadyExists(String),

    /// The federate name is already in use in the execution
    #[error("Federate name already in use: {0}")]
    FederateNameInUse(String),

    /// The call requires a joined federate
    #[error("Federate is not an execution member")]
    NotJoined,

    /// A class, parameter or attribute name is absent from the FOM
    #[error("Name not defined in the FOM: {0}")]
    NameNotFound(String),

    /// A handle passed to the RTI is not known to it
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),

    /// Sending an interaction class that is not currently published
    #[error("Interaction class not published: {0}")]
    InteractionClassNotPublished(String),

    /// A time-advance request or time stamp violated time-management rules
    #[error("Invalid logical time: {0}")]
    InvalidLogicalTime(String),

    /// A time-advance request is already outstanding
    #[error("Time advance already in progress")]
    InTimeAdvancingState,

    /// Generic RTI-internal failure
    #[error("RTI internal error: {0}")]
    Internal(String),
}

impl RtiError {
    /// Creates an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Returns true for failures that may succeed when the call is repeated
    /// after corrective action (re-publish, re-request).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RtiError::InteractionClassNotPublished(_) | RtiError::Internal(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(RtiError::InteractionClassNotPublished("X".into()).is_transient());
        assert!(RtiError::internal("hiccup").is_transient());
        assert!(!RtiError::NameNotFound("X".into()).is_transient());
        assert!(!RtiError::Unreachable("host".into()).is_transient());
    }
}
