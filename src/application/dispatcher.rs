// Consumer seam for stream events
use crate::domain::events::StreamEvent;

/// Receives stream events. Called from transport tasks, so implementations
/// must hand work off instead of blocking.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, event: StreamEvent);
}
