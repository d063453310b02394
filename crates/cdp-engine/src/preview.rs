//! latest-request-wins slots for input-driven previews
//!
//! every keystroke in an amount field starts a new preview. requests are not
//! cancelled; each one takes a token and a result is only kept if its token
//! is still the newest when it resolves.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;

use crate::error::{EngineError, Result};

/// monotonically increasing request tokens
#[derive(Debug, Default)]
pub struct RequestTracker {
    latest: AtomicU64,
}

impl RequestTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// issue a token that supersedes every earlier one
    pub fn issue(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn latest(&self) -> u64 {
        self.latest.load(Ordering::SeqCst)
    }

    pub fn is_latest(&self, token: u64) -> bool {
        token == self.latest()
    }

    /// `StaleResponse` if a newer token was issued after `token`
    pub fn check(&self, token: u64) -> Result<()> {
        let latest = self.latest();
        if token == latest {
            Ok(())
        } else {
            Err(EngineError::StaleResponse { token, latest })
        }
    }
}

/// what a preview field currently shows
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum PreviewState<T> {
    #[default]
    Empty,
    /// input did not parse or a read failed
    Unavailable(String),
    Ready(T),
}

impl<T> PreviewState<T> {
    pub fn ready(&self) -> Option<&T> {
        match self {
            PreviewState::Ready(v) => Some(v),
            _ => None,
        }
    }
}

/// one preview field
pub struct PreviewSlot<T> {
    tracker: RequestTracker,
    state: RwLock<PreviewState<T>>,
}

impl<T> Default for PreviewSlot<T> {
    fn default() -> Self {
        Self {
            tracker: RequestTracker::new(),
            state: RwLock::new(PreviewState::Empty),
        }
    }
}

impl<T: Clone + Send + Sync> PreviewSlot<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// start a request; the returned token must be passed to `finish`
    pub fn begin(&self) -> u64 {
        self.tracker.issue()
    }

    /// publish a result if `token` is still the newest request
    ///
    /// a zero amount empties the field and preview-local errors make it
    /// `Unavailable`. any other error also marks it `Unavailable` and is
    /// returned, so an older `Ready` value never outlives the input it was for.
    pub async fn finish(&self, token: u64, result: Result<T>) -> Result<()> {
        let mut state = self.state.write().await;
        // checked under the write lock so a newer finish cannot interleave
        if let Err(stale) = self.tracker.check(token) {
            tracing::debug!("dropping stale preview: {}", stale);
            return Err(stale);
        }

        match result {
            Ok(value) => {
                *state = PreviewState::Ready(value);
                Ok(())
            }
            Err(EngineError::ZeroAmount) => {
                *state = PreviewState::Empty;
                Ok(())
            }
            Err(e) if e.is_preview_local() => {
                *state = PreviewState::Unavailable(e.to_string());
                Ok(())
            }
            Err(e) => {
                *state = PreviewState::Unavailable(e.to_string());
                Err(e)
            }
        }
    }

    /// begin now, then await `fut` and finish
    ///
    /// the token is taken when `run` is called, not when the returned future
    /// is first polled, so requests are ordered by when they were made.
    pub fn run<'a, F>(&'a self, fut: F) -> impl Future<Output = Result<()>> + 'a
    where
        F: Future<Output = Result<T>> + 'a,
        T: 'a,
    {
        let token = self.begin();
        async move {
            let result = fut.await;
            self.finish(token, result).await
        }
    }

    /// empty the field (input cleared)
    pub async fn clear(&self) {
        self.tracker.issue();
        *self.state.write().await = PreviewState::Empty;
    }

    pub async fn current(&self) -> PreviewState<T> {
        self.state.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_tracker_tokens() {
        let tracker = RequestTracker::new();
        let a = tracker.issue();
        let b = tracker.issue();
        assert!(b > a);
        assert!(tracker.is_latest(b));
        assert!(!tracker.is_latest(a));
        assert_eq!(tracker.check(a), Err(EngineError::StaleResponse { token: a, latest: b }));
        assert!(tracker.check(a).unwrap_err().is_stale());
    }

    #[tokio::test]
    async fn test_out_of_order_keeps_newest() {
        let slot = PreviewSlot::<u32>::new();
        let first = slot.begin();
        let second = slot.begin();

        slot.finish(second, Ok(2)).await.unwrap();
        let late = slot.finish(first, Ok(1)).await;
        assert!(late.unwrap_err().is_stale());
        assert_eq!(slot.current().await, PreviewState::Ready(2));
    }

    #[tokio::test]
    async fn test_in_order_keeps_newest() {
        let slot = PreviewSlot::<u32>::new();
        let first = slot.begin();
        let second = slot.begin();

        assert!(slot.finish(first, Ok(1)).await.unwrap_err().is_stale());
        slot.finish(second, Ok(2)).await.unwrap();
        assert_eq!(slot.current().await, PreviewState::Ready(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_slow_request_dropped() {
        let slot = PreviewSlot::<&'static str>::new();

        let slow = slot.run(async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok("old input")
        });
        let fast = async {
            // issued after the slow request
            tokio::time::sleep(Duration::from_millis(1)).await;
            slot.run(async { Ok("new input") }).await
        };

        let (slow, fast) = tokio::join!(slow, fast);
        assert!(slow.unwrap_err().is_stale());
        fast.unwrap();
        assert_eq!(slot.current().await, PreviewState::Ready("new input"));
    }

    #[tokio::test]
    async fn test_parse_error_is_unavailable() {
        let slot = PreviewSlot::<u32>::new();
        let token = slot.begin();
        slot.finish(token, Err(EngineError::Parse("abc".into()))).await.unwrap();
        assert!(matches!(slot.current().await, PreviewState::Unavailable(_)));

        let token = slot.begin();
        let err = slot.finish(token, Err(EngineError::NotConnected)).await.unwrap_err();
        assert_eq!(err, EngineError::NotConnected);
        assert!(matches!(slot.current().await, PreviewState::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_bad_address_replaces_ready() {
        let slot = PreviewSlot::<u32>::new();
        slot.run(async { Ok(1) }).await.unwrap();
        assert_eq!(slot.current().await, PreviewState::Ready(1));

        slot.run(async { Err(EngineError::InvalidAddress("0xdead".into())) })
            .await
            .unwrap();
        assert_eq!(
            slot.current().await,
            PreviewState::Unavailable("invalid address: 0xdead".into())
        );
    }

    #[tokio::test]
    async fn test_zero_amount_empties_field() {
        let slot = PreviewSlot::<u32>::new();
        slot.run(async { Ok(7) }).await.unwrap();
        slot.run(async { Err(EngineError::ZeroAmount) }).await.unwrap();
        assert_eq!(slot.current().await, PreviewState::Empty);
    }

    #[tokio::test]
    async fn test_run_orders_by_creation_not_poll() {
        let slot = PreviewSlot::<&'static str>::new();
        let older = slot.run(async { Ok("older input") });
        let newer = slot.run(async { Ok("newer input") });

        newer.await.unwrap();
        assert!(older.await.unwrap_err().is_stale());
        assert_eq!(slot.current().await, PreviewState::Ready("newer input"));
    }

    #[tokio::test]
    async fn test_clear_supersedes_pending() {
        let slot = PreviewSlot::<u32>::new();
        let token = slot.begin();
        slot.clear().await;
        assert!(slot.finish(token, Ok(5)).await.unwrap_err().is_stale());
        assert_eq!(slot.current().await, PreviewState::Empty);
    }
}
