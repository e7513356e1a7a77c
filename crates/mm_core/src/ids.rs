//! Symbolic identifiers for datasets, clips, layers and transition tables.

use std::fmt;
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

macro_rules! symbol_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
        #[serde(transparent)]
        pub struct $name(#[schemars(with = "String")] Arc<str>);

        impl $name {
            pub fn new(name: &str) -> Self {
                Self(Arc::from(name))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(name: &str) -> Self {
                Self::new(name)
            }
        }

        impl From<String> for $name {
            fn from(name: String) -> Self {
                Self(Arc::from(name))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

symbol_id!(
    /// Names a motion dataset in the registry.
    DatasetId
);
symbol_id!(
    /// Names a clip inside a dataset.
    ClipId
);
symbol_id!(
    /// Names a search layer; `"default"` is always active.
    LayerId
);
symbol_id!(
    /// Names a transition table in the registry.
    TransitionTableId
);

impl LayerId {
    pub fn default_layer() -> Self {
        Self::new(DEFAULT_LAYER)
    }
}

pub const DEFAULT_LAYER: &str = "default";
/// Wildcard side of a transition table entry.
pub const ANY_DATASET: &str = "any";
