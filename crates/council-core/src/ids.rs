use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque string id minted as `<prefix>_<uuid v7>`, so ids of one kind sort
/// by creation time. Serialized as the bare string.
macro_rules! council_id {
    ($(#[$meta:meta])* $name:ident => $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn new() -> Self {
                Self(format!(concat!($prefix, "_{}"), Uuid::now_v7().simple()))
            }

            /// Wrap an id received from outside, e.g. a URL path segment.
            pub fn from_raw(s: impl Into<String>) -> Self {
                Self(s.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

council_id!(
    /// One user message and the two advisor answers it triggers.
    TurnId => "turn"
);
council_id!(
    /// A conversation entry.
    MessageId => "msg"
);
