//! Per-instance logging callbacks (spec §9: "avoid process-wide mutable
//! state"). Each operation that wants to report something routes through a
//! `Logger` value instead of a global log sink.

use std::sync::Arc;

type Callback = Arc<dyn Fn(&str) + Send + Sync>;

/// Three optional callbacks, one per severity. Absence of a callback is not
/// an error (spec §7): messages are simply dropped.
#[derive(Clone, Default)]
pub struct Logger {
    info: Option<Callback>,
    warn: Option<Callback>,
    error: Option<Callback>,
}

impl Logger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_info(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.info = Some(Arc::new(f));
        self
    }

    pub fn with_warn(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.warn = Some(Arc::new(f));
        self
    }

    pub fn with_error(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.error = Some(Arc::new(f));
        self
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        if let Some(f) = &self.info {
            f(msg.as_ref());
        }
    }

    pub fn warn(&self, msg: impl AsRef<str>) {
        if let Some(f) = &self.warn {
            f(msg.as_ref());
        }
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        if let Some(f) = &self.error {
            f(msg.as_ref());
        }
    }
}

impl std::fmt::Debug for Logger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Logger")
            .field("info", &self.info.is_some())
            .field("warn", &self.warn.is_some())
            .field("error", &self.error.is_some())
            .finish()
    }
}
