//! Common types shared between the bridge and the bus collaborator.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

macro_rules! handle_type {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub u32);

        impl $name {
            /// Returns the raw handle value.
            pub fn raw(&self) -> u32 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

handle_type!(
    /// Opaque handle for an interaction class.
    InteractionClassHandle,
    "ic"
);
handle_type!(
    /// Opaque handle for a parameter of an interaction class.
    ParameterHandle,
    "p"
);
handle_type!(
    /// Opaque handle for an object class.
    ObjectClassHandle,
    "oc"
);
handle_type!(
    /// Opaque handle for an attribute of an object class.
    AttributeHandle,
    "a"
);
handle_type!(
    /// Handle the RTI assigns to a joined federate.
    FederateHandle,
    "fed"
);

/// Encoded parameter values keyed by parameter handle.
pub type ParameterMap = HashMap<ParameterHandle, Vec<u8>>;

/// Logical (federation) time.
///
/// HLA floating-point time: a non-negative number of abstract time units.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
pub struct LogicalTime(pub f64);

impl LogicalTime {
    /// The initial time of every federate.
    pub const ZERO: LogicalTime = LogicalTime(0.0);

    /// Returns the raw time value.
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Returns this time shifted forward by `lookahead`.
    pub fn plus(&self, lookahead: Lookahead) -> LogicalTime {
        LogicalTime(self.0 + lookahead.0)
    }
}

impl fmt::Display for LogicalTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t={:.3}", self.0)
    }
}

/// Lookahead interval, in logical time units.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Lookahead(pub f64);

impl Default for Lookahead {
    fn default() -> Self {
        Self(1.0)
    }
}

/// What the RTI does with a federate's owned objects on resign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResignAction {
    /// Leave objects and ownership untouched.
    NoAction,
    /// Delete objects the federate has the privilege to delete.
    DeleteObjects,
    /// Divest ownership of all attributes unconditionally.
    DivestAttributes,
    /// Delete deletable objects, then divest the remainder.
    #[default]
    DeleteObjectsThenDivest,
}

/// Information about the federate that sent an interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderInfo {
    /// Handle of the producing federate
    pub federate: FederateHandle,
}

/// An interaction as delivered by the bus on its callback thread.
///
/// Nothing here has been decoded yet. The class and parameter handles are
/// only meaningful once the class registry has been resolved.
#[derive(Debug, Clone)]
pub struct InboundInteraction {
    /// Interaction class
    pub class: InteractionClassHandle,

    /// Raw parameter values
    pub parameters: ParameterMap,

    /// Producing federate
    pub sender: SenderInfo,

    /// User-supplied tag (used for federate addressing)
    pub tag: Vec<u8>,

    /// Time stamp for time-stamp-ordered delivery, `None` for receive order
    pub timestamp: Option<LogicalTime>,
}

impl InboundInteraction {
    /// Returns the number of parameters carried.
    pub fn parameter_count(&self) -> usize {
        self.parameters.len()
    }
}
