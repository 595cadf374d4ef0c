// Client-side collector filter for stream events

/// Which collector's live data a stream client accepts.
///
/// A client that never subscribed accepts every collector. After an explicit
/// unsubscribe nothing is accepted until a new collector is chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Subscription {
    #[default]
    Unset,
    Collector(String),
    Cleared,
}

impl Subscription {
    pub fn accepts(&self, collector_id: &str) -> bool {
        match self {
            Subscription::Unset => true,
            Subscription::Collector(id) => id == collector_id,
            Subscription::Cleared => false,
        }
    }

    pub fn collector_id(&self) -> Option<&str> {
        match self {
            Subscription::Collector(id) => Some(id),
            _ => None,
        }
    }
}
