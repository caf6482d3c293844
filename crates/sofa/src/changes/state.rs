//! Changes-feed lifecycle

use tokio::sync::watch;

/// Lifecycle of a changes feed.
///
/// ```text
/// Idle -> Connecting -> Delivering -> Reconnecting -> Connecting -> ...
///   \________\______________\______________\____________-> Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedState {
    Idle,
    Connecting,
    Delivering,
    Reconnecting,
    Closed,
}

impl FeedState {
    pub fn can_transition_to(self, next: FeedState) -> bool {
        use FeedState::*;
        matches!(
            (self, next),
            (Idle, Connecting)
                | (Connecting, Delivering)
                | (Connecting, Reconnecting)
                | (Delivering, Reconnecting)
                | (Reconnecting, Connecting)
                | (Idle | Connecting | Delivering | Reconnecting, Closed)
        )
    }

    pub fn is_closed(self) -> bool {
        self == FeedState::Closed
    }
}

impl std::fmt::Display for FeedState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FeedState::Idle => "idle",
            FeedState::Connecting => "connecting",
            FeedState::Delivering => "delivering",
            FeedState::Reconnecting => "reconnecting",
            FeedState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Shared state cell; rejects transitions the lifecycle does not allow
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<FeedState>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(FeedState::Idle);
        Self { tx }
    }

    pub fn get(&self) -> FeedState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<FeedState> {
        self.tx.subscribe()
    }

    /// Move to `next`; returns `false` if the transition is not allowed
    pub fn set(&self, next: FeedState) -> bool {
        self.tx.send_if_modified(|state| {
            if state.can_transition_to(next) {
                *state = next;
                true
            } else {
                false
            }
        })
    }
}
