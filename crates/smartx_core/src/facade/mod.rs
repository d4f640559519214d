//! The four public façades, each an `impl SmartXbar` block in its own
//! file so the one god-object stays navigable by concern, the way the
//! teacher splits `gecko_core::engine`'s command handling away from its
//! stream setup even though both act on the same `AudioEngine`.

pub mod debug;
pub mod processing;
pub mod routing;
pub mod setup;
