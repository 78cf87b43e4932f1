//! Per-client window state.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One client's current window.
///
/// Values are never mutated in place: every recorded request produces a new
/// `ClientState` that replaces the previous one in the engine's population.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientState {
    /// Opaque client identifier, usually an IP address
    client_id: String,
    /// When the current window began
    window_start: DateTime<Utc>,
    /// Requests counted in this window, including the one that opened it
    hits: u64,
    /// Requests permitted in this window, fixed when the window opened
    limit: u64,
}

impl ClientState {
    /// Open a new window for `client_id` at `now` with a single hit.
    pub fn new(client_id: impl Into<String>, limit: u64, now: DateTime<Utc>) -> Self {
        Self {
            client_id: client_id.into(),
            window_start: now,
            hits: 1,
            limit,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn window_start(&self) -> DateTime<Utc> {
        self.window_start
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Whether `window` has fully elapsed since the window opened.
    pub fn is_expired(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        now - self.window_start >= window
    }

    /// Whether the request that produced this state went past the limit.
    pub fn is_over_limit(&self) -> bool {
        self.hits > self.limit
    }

    /// Whether the window's quota is used up.
    pub fn is_exhausted(&self) -> bool {
        self.hits >= self.limit
    }

    /// Requests left in this window, floored at zero.
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.hits)
    }

    /// The instant this window closes.
    ///
    /// Saturates at the latest representable instant.
    pub fn window_expiry_time(&self, window: chrono::Duration) -> DateTime<Utc> {
        self.window_start
            .checked_add_signed(window)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// A copy of this state with one more hit counted.
    #[must_use]
    pub fn with_incremented_hit(&self) -> Self {
        Self {
            hits: self.hits.saturating_add(1),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_new_state_has_one_hit() {
        let state = ClientState::new("10.0.0.1", 3, start());

        assert_eq!(state.client_id(), "10.0.0.1");
        assert_eq!(state.hits(), 1);
        assert_eq!(state.limit(), 3);
        assert_eq!(state.remaining(), 2);
        assert!(!state.is_over_limit());
        assert!(!state.is_exhausted());
    }

    #[test]
    fn test_expiry_boundary() {
        let state = ClientState::new("a", 3, start());
        let window = Duration::seconds(60);

        assert!(!state.is_expired(start() + Duration::seconds(59), window));
        assert!(state.is_expired(start() + Duration::seconds(60), window));
        assert_eq!(state.window_expiry_time(window), start() + window);
    }

    #[test]
    fn test_expiry_time_saturates() {
        let state = ClientState::new("a", 3, DateTime::<Utc>::MAX_UTC - Duration::seconds(10));

        assert_eq!(
            state.window_expiry_time(Duration::seconds(60)),
            DateTime::<Utc>::MAX_UTC
        );
    }

    #[test]
    fn test_increment_leaves_original_untouched() {
        let first = ClientState::new("a", 2, start());
        let second = first.with_incremented_hit();

        assert_eq!(first.hits(), 1);
        assert_eq!(second.hits(), 2);
        assert_eq!(second.window_start(), first.window_start());
        assert_eq!(second.client_id(), first.client_id());
    }

    #[test]
    fn test_remaining_saturates() {
        let state = ClientState::new("a", 2, start())
            .with_incremented_hit()
            .with_incremented_hit()
            .with_incremented_hit();

        assert_eq!(state.hits(), 4);
        assert_eq!(state.remaining(), 0);
        assert!(state.is_exhausted());
        assert!(state.is_over_limit());
    }

    #[test]
    fn test_exhausted_before_over_limit() {
        let state = ClientState::new("a", 2, start()).with_incremented_hit();

        assert!(state.is_exhausted());
        assert!(!state.is_over_limit());
    }

    #[test]
    fn test_zero_limit_is_over_on_first_hit() {
        let state = ClientState::new("a", 0, start());

        assert!(state.is_over_limit());
        assert_eq!(state.remaining(), 0);
    }
}
