//! Client-side session synchronizer.
//!
//! Holds the active session's messages locally and pushes them to a
//! [`SessionRemote`] on four triggers:
//!
//! - a completed assistant turn, delayed by a settle period and throttled
//! - a periodic tick while a session is active
//! - switching to another session (fire-and-forget flush of the outgoing one)
//! - unload, which sends a beacon whose response is never awaited
//!
//! Every flush sends the full local list; the sink merges by message id, so
//! overlapping flushes are harmless.

pub mod remote;
pub mod schedule;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use tokio::task::JoinSet;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use crate::error::SyncError;
use crate::model::{Message, SessionRef};

pub use remote::{HttpRemote, SessionRemote};
pub use schedule::ScheduledTask;

/// Timing knobs for [`Synchronizer`].
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Wait between a turn completing and its save, so trailing updates land.
    pub settle_delay: Duration,
    /// Minimum gap between two turn-triggered saves.
    pub throttle_window: Duration,
    /// Pause after the outgoing flush before loading the next session.
    pub switch_grace: Duration,
    /// Period of the background flush while a session is active.
    pub tick_interval: Duration,
    /// How long [`Synchronizer::shutdown`] waits for beacons.
    pub unload_timeout: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_millis(300),
            throttle_window: Duration::from_secs(2),
            switch_grace: Duration::from_millis(100),
            tick_interval: Duration::from_secs(5),
            unload_timeout: Duration::from_secs(2),
        }
    }
}

#[derive(Debug, Default)]
struct LocalState {
    current: Option<SessionRef>,
    messages: Vec<Message>,
    /// Bumped on every open so a slow fetch cannot clobber a newer one.
    generation: u64,
    save_pending: bool,
    last_saved_at: Option<Instant>,
    pending_save: Option<ScheduledTask>,
    ticker: Option<ScheduledTask>,
}

struct Shared<R> {
    remote: R,
    settings: SyncSettings,
    state: Mutex<LocalState>,
    beacons: Mutex<JoinSet<()>>,
}

impl<R: SessionRemote> Shared<R> {
    fn state(&self) -> MutexGuard<'_, LocalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn beacons(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.beacons.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current session and a copy of its messages, or `None` when there is
    /// nothing worth sending.
    fn snapshot(&self) -> Option<(SessionRef, Vec<Message>)> {
        let st = self.state();
        let session = st.current?;
        if st.messages.is_empty() {
            return None;
        }
        Some((session, st.messages.clone()))
    }

    async fn flush(&self, session: SessionRef, messages: Vec<Message>, trigger: &'static str) -> bool {
        let sent = messages.len();
        match self.remote.append_batch(session, messages).await {
            Ok(message_count) => {
                debug!(%session, trigger, sent, message_count, "flush complete");
                true
            }
            Err(e) => {
                warn!(%session, trigger, error = %e, "flush failed; next trigger retries");
                false
            }
        }
    }
}

/// Keeps one active session in sync with a [`SessionRemote`].
///
/// Cloning yields another handle to the same state.
pub struct Synchronizer<R: SessionRemote> {
    shared: Arc<Shared<R>>,
}

impl<R: SessionRemote> Clone for Synchronizer<R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<R: SessionRemote> Synchronizer<R> {
    pub fn new(remote: R, settings: SyncSettings) -> Self {
        Self {
            shared: Arc::new(Shared {
                remote,
                settings,
                state: Mutex::new(LocalState::default()),
                beacons: Mutex::new(JoinSet::new()),
            }),
        }
    }

    pub fn remote(&self) -> &R {
        &self.shared.remote
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.shared.settings
    }

    pub fn current(&self) -> Option<SessionRef> {
        self.shared.state().current
    }

    pub fn messages(&self) -> Vec<Message> {
        self.shared.state().messages.clone()
    }

    pub fn is_save_pending(&self) -> bool {
        self.shared.state().save_pending
    }

    /// Make `session` active with `messages` as its local state and start
    /// the periodic flush for it. Any previous ticker is stopped.
    pub fn load(&self, session: SessionRef, messages: Vec<Message>) {
        let ticker = self.start_ticker(session);
        let previous = {
            let mut st = self.shared.state();
            st.generation += 1;
            st.current = Some(session);
            st.messages = messages;
            st.ticker.replace(ticker)
        };
        drop(previous);
        info!(%session, "session loaded");
    }

    /// Fetch `session` from the remote and load it. On fetch failure the
    /// session still becomes active with an empty list and the error is
    /// returned.
    pub async fn open(&self, session: SessionRef) -> Result<(), SyncError> {
        let generation = {
            let mut st = self.shared.state();
            st.generation += 1;
            st.generation
        };
        let fetched = self.shared.remote.fetch_messages(session).await;
        if self.shared.state().generation != generation {
            debug!(%session, "stale open superseded");
            return fetched.map(|_| ());
        }
        match fetched {
            Ok(messages) => {
                self.load(session, messages);
                Ok(())
            }
            Err(e) => {
                warn!(%session, error = %e, "failed to fetch session; starting empty");
                self.load(session, Vec::new());
                Err(e)
            }
        }
    }

    /// Replace local messages with the remote copy. Unflushed local messages
    /// are discarded. The result is dropped if another session was loaded
    /// while the fetch was in flight, even if it was this one again.
    pub async fn reload(&self) -> Result<(), SyncError> {
        let (session, generation) = {
            let st = self.shared.state();
            (st.current.ok_or(SyncError::NoSession)?, st.generation)
        };
        let messages = self.shared.remote.fetch_messages(session).await?;
        let mut st = self.shared.state();
        if st.generation == generation {
            st.messages = messages;
        } else {
            debug!(%session, "stale reload discarded");
        }
        Ok(())
    }

    /// Insert or update a message by id. Streaming updates to the same id
    /// overwrite in place.
    pub fn record(&self, message: Message) {
        let mut st = self.shared.state();
        match st.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => *existing = message,
            None => st.messages.push(message),
        }
    }

    /// Signal that an assistant turn finished. Schedules a save after the
    /// settle delay unless one is already pending or the last save is within
    /// the throttle window. Returns whether a save was scheduled.
    pub fn turn_completed(&self) -> bool {
        let settings = &self.shared.settings;
        let mut st = self.shared.state();
        if st.current.is_none() {
            return false;
        }
        if st.save_pending {
            debug!("save already pending");
            return false;
        }
        if st
            .last_saved_at
            .is_some_and(|at| at.elapsed() < settings.throttle_window)
        {
            debug!("save throttled");
            return false;
        }

        st.save_pending = true;
        let shared = Arc::clone(&self.shared);
        st.pending_save = Some(ScheduledTask::after(
            "sync-turn-save",
            settings.settle_delay,
            async move {
                let saved = match shared.snapshot() {
                    Some((session, messages)) => shared.flush(session, messages, "turn").await,
                    None => false,
                };
                let mut st = shared.state();
                st.save_pending = false;
                if saved {
                    st.last_saved_at = Some(Instant::now());
                }
            },
        ));
        true
    }

    /// Flush the outgoing session without waiting, stop its ticker, then
    /// open `next` after a short grace period.
    pub async fn switch_to(&self, next: SessionRef) -> Result<(), SyncError> {
        let ticker = self.shared.state().ticker.take();
        drop(ticker);
        if let Some((session, messages)) = self.shared.snapshot() {
            let shared = Arc::clone(&self.shared);
            tokio::spawn(async move {
                shared.flush(session, messages, "switch").await;
            });
        }
        time::sleep(self.shared.settings.switch_grace).await;
        self.open(next).await
    }

    /// Send a beacon for the current session and stop the ticker. The send
    /// runs in the background; [`Synchronizer::shutdown`] waits for it.
    pub fn unload(&self) {
        let ticker = self.shared.state().ticker.take();
        drop(ticker);
        let Some((session, messages)) = self.shared.snapshot() else {
            return;
        };
        info!(%session, messages = messages.len(), "sending unload beacon");
        let shared = Arc::clone(&self.shared);
        let mut beacons = self.shared.beacons();
        while beacons.try_join_next().is_some() {}
        beacons.spawn(async move {
            if let Err(e) = shared.remote.beacon(session, messages).await {
                warn!(%session, error = %e, "unload beacon failed");
            }
        });
    }

    /// Stop background work without flushing.
    pub fn stop(&self) {
        let (ticker, pending) = {
            let mut st = self.shared.state();
            st.save_pending = false;
            (st.ticker.take(), st.pending_save.take())
        };
        drop(ticker);
        drop(pending);
    }

    /// Unload, then wait up to the unload timeout for beacons to finish.
    pub async fn shutdown(&self) {
        self.unload();
        let mut beacons = std::mem::replace(&mut *self.shared.beacons(), JoinSet::new());
        let drained = time::timeout(self.shared.settings.unload_timeout, async {
            while beacons.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = beacons.len(), "beacons still in flight at shutdown; aborting");
            beacons.abort_all();
        }
        self.stop();
    }

    fn start_ticker(&self, session: SessionRef) -> ScheduledTask {
        let weak: Weak<Shared<R>> = Arc::downgrade(&self.shared);
        ScheduledTask::every("sync-tick", self.shared.settings.tick_interval, move || {
            let weak = weak.clone();
            async move {
                let Some(shared) = weak.upgrade() else {
                    return;
                };
                let snapshot = shared
                    .snapshot()
                    .filter(|(current, _)| *current == session);
                if let Some((session, messages)) = snapshot {
                    shared.flush(session, messages, "tick").await;
                }
            }
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};

    use uuid::Uuid;

    use crate::model::SessionKind;

    type Sent = Vec<(SessionRef, Vec<String>)>;

    #[derive(Default)]
    struct FakeRemote {
        appends: Mutex<Sent>,
        beacons: Mutex<Sent>,
        stored: Mutex<HashMap<Uuid, Vec<Message>>>,
        fetch_delays: Mutex<HashMap<Uuid, Duration>>,
        fail_appends: AtomicBool,
    }

    fn ids(messages: &[Message]) -> Vec<String> {
        messages.iter().map(|m| m.id.clone()).collect()
    }

    impl FakeRemote {
        fn appends(&self) -> Sent {
            self.appends.lock().unwrap().clone()
        }

        fn store(&self, session: SessionRef, messages: Vec<Message>) {
            self.stored.lock().unwrap().insert(session.id, messages);
        }

        fn slow_fetch(&self, session: SessionRef, delay: Duration) {
            self.fetch_delays.lock().unwrap().insert(session.id, delay);
        }
    }

    impl SessionRemote for FakeRemote {
        async fn append_batch(&self, session: SessionRef, messages: Vec<Message>) -> Result<usize, SyncError> {
            self.appends.lock().unwrap().push((session, ids(&messages)));
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(SyncError::Status {
                    status: 503,
                    body: "unavailable".to_string(),
                });
            }
            Ok(messages.len())
        }

        async fn fetch_messages(&self, session: SessionRef) -> Result<Vec<Message>, SyncError> {
            let delay = self.fetch_delays.lock().unwrap().get(&session.id).copied();
            if let Some(delay) = delay {
                time::sleep(delay).await;
            }
            Ok(self
                .stored
                .lock()
                .unwrap()
                .get(&session.id)
                .cloned()
                .unwrap_or_default())
        }

        async fn beacon(&self, session: SessionRef, messages: Vec<Message>) -> Result<(), SyncError> {
            self.beacons.lock().unwrap().push((session, ids(&messages)));
            Ok(())
        }
    }

    fn session() -> SessionRef {
        SessionRef::new(Uuid::new_v4(), SessionKind::Ephemeral)
    }

    fn sync() -> Synchronizer<FakeRemote> {
        Synchronizer::new(FakeRemote::default(), SyncSettings::default())
    }

    async fn advance(ms: u64) {
        time::sleep(Duration::from_millis(ms)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn turn_save_waits_for_settle_delay() {
        let sync = sync();
        let a = session();
        sync.load(a, vec![Message::with_id("u1", "user", "hello")]);

        assert!(sync.turn_completed());
        advance(100).await;
        sync.record(Message::with_id("a1", "assistant", "hi there"));
        assert!(sync.remote().appends().is_empty());

        advance(250).await;
        assert_eq!(sync.remote().appends(), vec![(a, vec!["u1".to_string(), "a1".to_string()])]);
        assert!(!sync.is_save_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_turns_collapse_into_one_save() {
        let sync = sync();
        sync.load(session(), vec![Message::with_id("u1", "user", "hello")]);

        assert!(sync.turn_completed());
        assert!(!sync.turn_completed());
        advance(400).await;
        assert_eq!(sync.remote().appends().len(), 1);

        // within the throttle window of the last save
        assert!(!sync.turn_completed());
        advance(2_000).await;
        assert!(sync.turn_completed());
        advance(400).await;
        assert_eq!(sync.remote().appends().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_session_is_never_flushed() {
        let sync = sync();
        sync.load(session(), Vec::new());

        assert!(sync.turn_completed());
        advance(6_000).await;
        assert!(sync.remote().appends().is_empty());
        assert!(!sync.is_save_pending());
    }

    #[tokio::test(start_paused = true)]
    async fn failed_save_is_retried_by_next_trigger() {
        let sync = sync();
        sync.load(session(), vec![Message::with_id("u1", "user", "hello")]);
        sync.remote().fail_appends.store(true, Ordering::SeqCst);

        assert!(sync.turn_completed());
        advance(400).await;
        assert_eq!(sync.remote().appends().len(), 1);

        // a failure does not start the throttle window
        sync.remote().fail_appends.store(false, Ordering::SeqCst);
        assert!(sync.turn_completed());
        advance(400).await;
        assert_eq!(sync.remote().appends().len(), 2);
        assert_eq!(sync.messages().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn switch_flushes_outgoing_and_loads_next() {
        let sync = sync();
        let (a, b) = (session(), session());
        sync.remote().store(b, vec![Message::with_id("x1", "user", "from before")]);
        sync.load(a, vec![Message::with_id("m1", "user", "hello")]);

        sync.switch_to(b).await.unwrap();

        assert_eq!(sync.remote().appends(), vec![(a, vec!["m1".to_string()])]);
        assert_eq!(sync.current(), Some(b));
        assert_eq!(ids(&sync.messages()), vec!["x1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_follows_the_active_session() {
        let sync = sync();
        let (a, b) = (session(), session());
        sync.load(a, vec![Message::with_id("m1", "user", "hello")]);

        advance(5_100).await;
        assert_eq!(sync.remote().appends().len(), 1);
        advance(5_000).await;
        assert_eq!(sync.remote().appends().len(), 2);

        sync.switch_to(b).await.unwrap();
        assert_eq!(sync.remote().appends().len(), 3);

        // b is empty, so its ticker has nothing to send
        advance(11_000).await;
        let appends = sync.remote().appends();
        assert_eq!(appends.len(), 3);
        assert!(appends.iter().all(|(s, _)| *s == a));
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_sends_beacon_and_stops_ticker() {
        let sync = sync();
        let a = session();
        sync.load(a, vec![Message::with_id("m1", "user", "hello")]);
        sync.record(Message::with_id("m2", "assistant", "bye"));

        sync.shutdown().await;
        assert_eq!(
            sync.remote().beacons.lock().unwrap().clone(),
            vec![(a, vec!["m1".to_string(), "m2".to_string()])]
        );

        advance(20_000).await;
        assert!(sync.remote().appends().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn reload_replaces_local_state_wholesale() {
        let sync = sync();
        let a = session();
        sync.remote().store(a, vec![Message::with_id("m1", "user", "hello")]);
        sync.load(a, vec![Message::with_id("m1", "user", "hello")]);
        sync.record(Message::with_id("local", "assistant", "unsent"));

        sync.reload().await.unwrap();
        assert_eq!(ids(&sync.messages()), vec!["m1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn record_overwrites_streaming_updates() {
        let sync = sync();
        sync.load(session(), Vec::new());
        sync.record(Message::with_id("a1", "assistant", "par"));
        sync.record(Message::with_id("a1", "assistant", "partial reply"));

        let messages = sync.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].content, "partial reply");
    }

    #[tokio::test(start_paused = true)]
    async fn superseded_open_is_dropped() {
        let sync = sync();
        let (a, b) = (session(), session());
        sync.remote().store(a, vec![Message::with_id("a1", "user", "old")]);
        sync.remote().store(b, vec![Message::with_id("b1", "user", "new")]);
        sync.remote().slow_fetch(a, Duration::from_millis(500));

        let slow = tokio::spawn({
            let sync = sync.clone();
            async move { sync.open(a).await }
        });
        advance(10).await;
        sync.open(b).await.unwrap();
        assert_eq!(sync.current(), Some(b));

        advance(600).await;
        slow.await.unwrap().unwrap();
        assert_eq!(sync.current(), Some(b));
        assert_eq!(ids(&sync.messages()), vec!["b1".to_string()]);

        // only b's ticker was started
        advance(5_000).await;
        assert_eq!(sync.remote().appends(), vec![(b, vec!["b1".to_string()])]);
    }

    #[tokio::test(start_paused = true)]
    async fn reload_racing_a_switch_is_discarded() {
        let sync = sync();
        let (a, b) = (session(), session());
        sync.remote().store(a, vec![Message::with_id("a1", "user", "remote a")]);
        sync.remote().store(b, vec![Message::with_id("b1", "user", "remote b")]);
        sync.remote().slow_fetch(a, Duration::from_millis(500));
        sync.load(a, Vec::new());

        let slow = tokio::spawn({
            let sync = sync.clone();
            async move { sync.reload().await }
        });
        advance(10).await;
        sync.switch_to(b).await.unwrap();
        assert_eq!(sync.current(), Some(b));

        advance(600).await;
        slow.await.unwrap().unwrap();
        assert_eq!(sync.current(), Some(b));
        assert_eq!(ids(&sync.messages()), vec!["b1".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn reload_is_discarded_after_reopening_the_same_session() {
        let sync = sync();
        let (a, b) = (session(), session());
        sync.remote().store(a, vec![Message::with_id("a1", "user", "remote a")]);
        sync.remote().slow_fetch(a, Duration::from_millis(500));
        sync.load(a, Vec::new());

        let slow = tokio::spawn({
            let sync = sync.clone();
            async move { sync.reload().await }
        });
        advance(10).await;
        sync.load(b, Vec::new());
        sync.load(a, vec![Message::with_id("fresh", "user", "typed after reopening")]);

        advance(600).await;
        slow.await.unwrap().unwrap();
        assert_eq!(sync.current(), Some(a));
        assert_eq!(ids(&sync.messages()), vec!["fresh".to_string()]);
    }

    #[tokio::test]
    async fn reload_without_session_is_an_error() {
        assert!(matches!(sync().reload().await, Err(SyncError::NoSession)));
    }
}
