//! # Identity Newtypes
//!
//! Domain-primitive newtypes for identifiers throughout the engine.
//! Each identifier is a distinct type: you cannot pass a [`SiteId`] where
//! an [`AgentId`] is expected. All identifiers are UUID-based and therefore
//! valid by construction; they serialize as plain UUID strings.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Create a new random identifier.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Wrap an existing UUID.
            pub const fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            /// Access the underlying UUID.
            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl From<Uuid> for $name {
            fn from(id: Uuid) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl std::str::FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_identifier!(
    /// A field agent reporting positions. Supplied by the caller's auth context.
    AgentId
);

uuid_identifier!(
    /// A site an agent can be assigned to. Sites own their geofences.
    SiteId
);

uuid_identifier!(
    /// A geofence zone definition.
    GeofenceId
);

uuid_identifier!(
    /// A persisted location sample.
    SampleId
);

uuid_identifier!(
    /// A confirmed violation episode.
    ViolationId
);

uuid_identifier!(
    /// A single containment check row in the audit trail.
    ValidationId
);

impl GeofenceId {
    /// Synthetic zone id used for validations of sites with no active zones.
    pub const NO_ZONES_CONFIGURED: GeofenceId = GeofenceId::from_uuid(Uuid::nil());

    /// Whether this is the synthetic "no zones configured" id.
    pub fn is_no_zones_configured(&self) -> bool {
        self.0.is_nil()
    }
}
