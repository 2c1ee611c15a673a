use bytes::Bytes;

/// Per-session `getLastError` context.
///
/// Populated only by the [`QueryProxy`](crate::QueryProxy) collaborator when
/// it observes a query path that produces a cached last-error reply. The core
/// never looks inside the payload; it only checks for presence and clears the
/// window when any non-query message invalidates it.
#[derive(Debug, Default)]
pub struct LastErrorWindow {
    cached_reply: Option<Bytes>,
}

impl LastErrorWindow {
    /// True while a pending last-error context is held.
    pub fn exists(&self) -> bool {
        self.cached_reply.is_some()
    }

    /// Drop any pending context.
    pub fn reset(&mut self) {
        self.cached_reply = None;
    }

    /// Store a cached reply. Called by `QueryProxy` implementations.
    pub fn set(&mut self, reply: Bytes) {
        self.cached_reply = Some(reply);
    }

    /// The cached reply, if any. Read by `QueryProxy` implementations.
    pub fn cached_reply(&self) -> Option<&Bytes> {
        self.cached_reply.as_ref()
    }
}
