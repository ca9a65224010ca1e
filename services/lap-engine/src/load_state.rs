//! Loading state of live data
//!
//! Every view backed by a subscription is either still waiting for its first
//! snapshot, ready, or failed. Joins of two views stay `Pending` until both
//! sides are ready instead of guessing.

use crate::stream::SubscriptionError;

#[derive(Debug, Clone, PartialEq)]
pub enum LoadState<T> {
    /// No snapshot delivered yet
    Pending,
    /// Latest delivered value
    Ready(T),
    /// The subscription failed; the adapter is retrying
    Failed(SubscriptionError),
}

impl<T> LoadState<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, LoadState::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, LoadState::Ready(_))
    }

    pub fn ready(self) -> Option<T> {
        match self {
            LoadState::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_ref(&self) -> LoadState<&T> {
        match self {
            LoadState::Pending => LoadState::Pending,
            LoadState::Ready(value) => LoadState::Ready(value),
            LoadState::Failed(err) => LoadState::Failed(err.clone()),
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> LoadState<U> {
        match self {
            LoadState::Pending => LoadState::Pending,
            LoadState::Ready(value) => LoadState::Ready(f(value)),
            LoadState::Failed(err) => LoadState::Failed(err),
        }
    }

    /// Combine two states; a failure wins over pending, pending over ready.
    pub fn join<U>(self, other: LoadState<U>) -> LoadState<(T, U)> {
        match (self, other) {
            (LoadState::Failed(err), _) | (_, LoadState::Failed(err)) => LoadState::Failed(err),
            (LoadState::Ready(a), LoadState::Ready(b)) => LoadState::Ready((a, b)),
            _ => LoadState::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreError;

    fn failure() -> SubscriptionError {
        SubscriptionError {
            path: "laps".to_string(),
            cause: StoreError::Unavailable("offline".to_string()),
        }
    }

    #[test]
    fn test_join_ready() {
        let joined = LoadState::Ready(1).join(LoadState::Ready("a"));
        assert_eq!(joined, LoadState::Ready((1, "a")));
    }

    #[test]
    fn test_join_pending_side_stays_pending() {
        let joined = LoadState::Ready(1).join(LoadState::<u8>::Pending);
        assert!(joined.is_pending());

        let joined = LoadState::<u8>::Pending.join(LoadState::Ready(1));
        assert!(joined.is_pending());
    }

    #[test]
    fn test_join_failure_wins() {
        let joined = LoadState::<u8>::Pending.join(LoadState::<u8>::Failed(failure()));
        assert_eq!(joined, LoadState::Failed(failure()));
    }

    #[test]
    fn test_map_and_ready() {
        let state = LoadState::Ready(20).map(|v| v + 1);
        assert_eq!(state.ready(), Some(21));
        assert_eq!(LoadState::<u8>::Pending.ready(), None);
    }
}
