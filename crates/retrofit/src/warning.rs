//! Destination for the human-readable warnings the shim emits.
//!
//! Warnings are rare and user-facing (the one-time patch notice and the
//! degraded cache-clear notice), so they go through a small trait rather than
//! straight to a logging macro. Applications that already route `tracing`
//! output need nothing more than the default [`TracingSink`].

use std::rc::Rc;

/// Prefix carried by every warning the shim emits.
pub const WARNING_PREFIX: &str = "[retrofit]";

/// Receives user-facing warnings.
pub trait WarningSink {
    /// Emit a single warning line.
    fn warn(&self, message: &str);
}

/// Forwards warnings to `tracing::warn!`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl WarningSink for TracingSink {
    fn warn(&self, message: &str) {
        tracing::warn!(target: "retrofit", "{}", message);
    }
}

/// The default sink shared by a freshly constructed shim.
pub(crate) fn default_sink() -> Rc<dyn WarningSink> {
    Rc::new(TracingSink)
}
