//! Arena handles.
//!
//! The original object graph wired devices, pins, pipelines and zones
//! together with owning and back-referencing smart pointers, which is
//! fine in C++ but fights the borrow checker in Rust (a pipeline can't
//! both be owned by, and hold a reference back to, its owning zone).
//!
//! Instead every addressable object lives in exactly one place, the
//! [`crate::registry::Registry`] arena, and everything else refers to it
//! by a small `Copy` handle. Reverse references (e.g. a zone's pointer
//! back to its base zone) are just handles too, resolved through the
//! registry on demand instead of stored as live references.

use serde::{Deserialize, Serialize};

macro_rules! define_handle {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub(crate) u64);

        impl $name {
            /// Constructs a handle from a raw id. Only the registry that
            /// owns the corresponding arena should normally do this;
            /// exposed publicly so other crates can build test fixtures
            /// and so runtime side-tables can use handles as map keys
            /// without round-tripping through the registry.
            pub fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn raw(self) -> u64 {
                self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}#{}", stringify!($name), self.0)
            }
        }
    };
}

define_handle!(DeviceHandle);
define_handle!(PortHandle);
define_handle!(ZoneHandle);
define_handle!(PipelineHandle);
define_handle!(PinHandle);
define_handle!(ModuleHandle);
define_handle!(LinkHandle);
