use crate::config::LeaderboardConfig;
use crate::core::retry::RetryPolicy;
use crate::core::single_flight::{FlightError, SingleFlight};
use crate::core::transport::{HttpTransport, Transport};
use crate::error::{ConfigError, LeaderboardError};
use crate::game::qualify::{self, QualificationDecision};
use crate::game::ranking::{self, RankingSnapshot};
use crate::game::submission::{self, SubmissionOutcome};
use log::{debug, info, warn};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const UNAVAILABLE_MESSAGE: &str = "Ranking unavailable. Please try again later.";
/// Slack on top of the worst case before a duplicate caller stops waiting.
const WAIT_GRACE: Duration = Duration::from_millis(250);

/// What the render loop shows while the board is loading or after it failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaderboardStatus {
    Idle,
    Loading,
    Ready { entries: usize },
    Unavailable(String),
}

type FetchResult = Result<RankingSnapshot, LeaderboardError>;

struct Retained {
    snapshot: RankingSnapshot,
    stored_at: Instant,
}

struct Inner {
    config: LeaderboardConfig,
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
    fetches: SingleFlight<(), FetchResult>,
    posts: SingleFlight<(i64, String), SubmissionOutcome>,
    fetch_wait: Duration,
    post_wait: Duration,
    last_good: Mutex<Option<Retained>>,
    status: Mutex<LeaderboardStatus>,
}

/// Remote ranking client. Cheap to clone; clones share in-flight state.
#[derive(Clone)]
pub struct LeaderboardClient {
    inner: Arc<Inner>,
}

impl LeaderboardClient {
    pub fn new(config: LeaderboardConfig) -> Result<Self, ConfigError> {
        let transport = Arc::new(HttpTransport::new(&config)?);
        let retry = RetryPolicy::from_config(&config);
        Ok(Self::with_transport(config, transport, retry))
    }

    pub fn with_transport(config: LeaderboardConfig, transport: Arc<dyn Transport>, retry: RetryPolicy) -> Self {
        // A post re-fetches before submitting and again after.
        let fetch_worst = retry.worst_case(transport.fetch_attempt_budget());
        let post_worst = fetch_worst
            .saturating_mul(2)
            .saturating_add(retry.worst_case(transport.post_attempt_budget()));

        info!(
            "Leaderboard client ready (endpoint '{}', {} retries).",
            config.endpoint,
            retry.max_retries()
        );
        Self {
            inner: Arc::new(Inner {
                config,
                transport,
                retry,
                fetches: SingleFlight::new(),
                posts: SingleFlight::new(),
                fetch_wait: fetch_worst.saturating_add(WAIT_GRACE),
                post_wait: post_worst.saturating_add(WAIT_GRACE),
                last_good: Mutex::new(None),
                status: Mutex::new(LeaderboardStatus::Idle),
            }),
        }
    }

    pub fn config(&self) -> &LeaderboardConfig {
        &self.inner.config
    }

    // --- Fetching ---

    /// Always asks the endpoint. `None` once every retry failed and nothing
    /// was ever fetched, or when the endpoint sent something unreadable.
    pub fn fetch_ranking(&self) -> Option<RankingSnapshot> {
        match self.try_fetch_ranking() {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Ranking unavailable: {}", e);
                None
            }
        }
    }

    /// Like [`fetch_ranking`](Self::fetch_ranking) but keeps the reason for a failure.
    pub fn try_fetch_ranking(&self) -> FetchResult {
        self.inner
            .fetches
            .run((), self.inner.fetch_wait, || self.fetch_live())
            .unwrap_or_else(|e| {
                Err(match e {
                    FlightError::TimedOut => LeaderboardError::WaitTimedOut("fetch"),
                    FlightError::Abandoned => LeaderboardError::Abandoned("fetch"),
                })
            })
    }

    fn fetch_live(&self) -> FetchResult {
        info!("Requesting ranking...");
        self.set_status(LeaderboardStatus::Loading);

        let transport = &self.inner.transport;
        let result = self.inner.retry.run("Ranking fetch", |attempt| {
            debug!("Ranking fetch attempt {}.", attempt);
            let raw = transport.attempt_fetch()?;
            Ok(ranking::normalize(&raw)?)
        });

        match result {
            Ok(snapshot) => {
                info!("Ranking received ({} entries).", snapshot.len());
                self.retain(&snapshot);
                self.set_status(LeaderboardStatus::Ready { entries: snapshot.len() });
                Ok(snapshot)
            }
            Err(LeaderboardError::Exhausted { attempts, last }) => match self.cached_ranking() {
                Some(stale) => {
                    warn!(
                        "Ranking fetch gave up after {} attempts ({}); returning the last good ranking.",
                        attempts, last
                    );
                    self.set_status(LeaderboardStatus::Ready { entries: stale.len() });
                    Ok(stale)
                }
                None => {
                    let err = LeaderboardError::Exhausted { attempts, last };
                    self.set_status(LeaderboardStatus::Unavailable(err.to_string()));
                    Err(err)
                }
            },
            Err(err) => {
                self.set_status(LeaderboardStatus::Unavailable(err.to_string()));
                Err(err)
            }
        }
    }

    // --- Ranking queries ---

    pub fn get_user_rank(&self, score: i64, snapshot: Option<&RankingSnapshot>) -> Option<u32> {
        qualify::get_user_rank(score, snapshot)
    }

    pub fn should_post_to_ranking(&self, score: i64, snapshot: Option<&RankingSnapshot>) -> QualificationDecision {
        qualify::should_post_with_places(score, snapshot, self.inner.config.qualifying_places)
    }

    // --- Submission ---

    /// Validates locally, re-checks qualification against a fresh ranking,
    /// then submits. Never panics or returns an error to the caller; every
    /// failure becomes an unsuccessful outcome with a readable message.
    pub fn post_score(&self, score: i64, name: &str) -> SubmissionOutcome {
        if let Err(e) = qualify::validate_score(score).and_then(|_| qualify::validate_player_name(name)) {
            warn!("Refusing to submit score {} for '{}': {}", score, name, e);
            return SubmissionOutcome::failed(e.to_string());
        }

        self.inner
            .posts
            .run((score, name.to_string()), self.inner.post_wait, || self.submit(score, name))
            .unwrap_or_else(|e| {
                warn!("Duplicate submission of {} for '{}' did not complete: {}", score, name, e);
                SubmissionOutcome::failed(UNAVAILABLE_MESSAGE)
            })
    }

    fn submit(&self, score: i64, name: &str) -> SubmissionOutcome {
        let current = self.fetch_ranking();
        let decision = self.should_post_to_ranking(score, current.as_ref());
        if !decision.should_post {
            info!("Not submitting score {}: {}", score, decision.reason);
            return SubmissionOutcome::failed(decision.reason);
        }

        info!("Submitting score {} for '{}'...", score, name);
        let transport = &self.inner.transport;
        let result = self.inner.retry.run("Score submission", |attempt| {
            debug!("Score submission attempt {}.", attempt);
            let raw = transport.attempt_post(score, name)?;
            submission::interpret_response(&raw)
        });

        match result {
            Ok(mut outcome) if outcome.success => {
                let confirmed = self.fetch_ranking();
                if outcome.rank.is_none() {
                    outcome.rank = confirmed.as_ref().and_then(|s| s.rank_of(name, score));
                }
                info!("Score {} for '{}' accepted (rank {:?}).", score, name, outcome.rank);
                outcome
            }
            Ok(outcome) => {
                warn!("Score {} for '{}' rejected: {}", score, name, outcome.message);
                outcome
            }
            Err(LeaderboardError::Exhausted { .. }) => SubmissionOutcome::failed(UNAVAILABLE_MESSAGE),
            Err(e) => SubmissionOutcome::failed(e.to_string()),
        }
    }

    // --- Background helpers for the render loop ---

    pub fn spawn_fetch(&self) -> PendingRequest<Option<RankingSnapshot>> {
        let client = self.clone();
        PendingRequest::spawn(move || client.fetch_ranking())
    }

    pub fn spawn_post(&self, score: i64, name: String) -> PendingRequest<SubmissionOutcome> {
        let client = self.clone();
        PendingRequest::spawn(move || client.post_score(score, &name))
    }

    // --- Retained ranking & state ---

    /// The last successfully fetched ranking, if any. Never refreshed by
    /// reading it.
    pub fn cached_ranking(&self) -> Option<RankingSnapshot> {
        self.lock_last_good().as_ref().map(|r| r.snapshot.clone())
    }

    pub fn cache_age(&self) -> Option<Duration> {
        self.lock_last_good().as_ref().map(|r| r.stored_at.elapsed())
    }

    pub fn is_cache_fresh(&self) -> bool {
        self.cache_age().is_some_and(|age| age < self.inner.config.cache_timeout)
    }

    pub fn clear_cache(&self) {
        *self.lock_last_good() = None;
        info!("Cleared retained ranking.");
    }

    pub fn is_loading(&self) -> bool {
        self.inner.fetches.is_in_flight(&())
    }

    pub fn status(&self) -> LeaderboardStatus {
        self.inner.status.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn set_status(&self, status: LeaderboardStatus) {
        *self.inner.status.lock().unwrap_or_else(PoisonError::into_inner) = status;
    }

    fn retain(&self, snapshot: &RankingSnapshot) {
        *self.lock_last_good() = Some(Retained {
            snapshot: snapshot.clone(),
            stored_at: Instant::now(),
        });
    }

    fn lock_last_good(&self) -> std::sync::MutexGuard<'_, Option<Retained>> {
        self.inner.last_good.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestStatus<T> {
    Pending,
    Ready(T),
    /// The worker died without reporting back.
    Lost,
}

/// Result of an operation running on a worker thread. Poll it once per frame.
pub struct PendingRequest<T> {
    receiver: Receiver<T>,
}

impl<T: Send + 'static> PendingRequest<T> {
    fn spawn(work: impl FnOnce() -> T + Send + 'static) -> Self {
        let (sender, receiver) = mpsc::channel();
        thread::spawn(move || {
            let _ = sender.send(work());
        });
        Self { receiver }
    }

    /// `Ready` exactly once; afterwards the request reports `Lost`.
    pub fn poll(&self) -> RequestStatus<T> {
        match self.receiver.try_recv() {
            Ok(value) => RequestStatus::Ready(value),
            Err(TryRecvError::Empty) => RequestStatus::Pending,
            Err(TryRecvError::Disconnected) => RequestStatus::Lost,
        }
    }

    pub fn wait(self) -> Option<T> {
        self.receiver.recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::callbacks::CallbackSlot;
    use crate::core::transport::ScriptInjector;
    use crate::error::TransportError;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use url::Url;

    /// Never answers, so every callback request runs into its timeout.
    struct SilentInjector;

    impl ScriptInjector for SilentInjector {
        fn inject(&self, _url: &Url, _slot: &CallbackSlot) -> Result<(), TransportError> {
            Ok(())
        }
    }

    /// Answers one direct request with a board after `delay`.
    fn serve_board_after(delay: Duration) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                thread::sleep(delay);
                let body = r#"{"top5":[{"score":700,"name":"ann","date":"2024-01-01"}]}"#;
                let reply = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = stream.write_all(reply.as_bytes());
            }
        });
        format!("http://{}/exec", addr)
    }

    #[test]
    fn duplicate_fetch_outlasts_callback_timeout_plus_slow_fallback() {
        let config = LeaderboardConfig {
            request_timeout: Duration::from_millis(400),
            max_retries: 0,
            ..LeaderboardConfig::default()
        }
        .with_endpoint(serve_board_after(Duration::from_millis(300)));
        let transport = HttpTransport::new(&config).unwrap().with_injector(Arc::new(SilentInjector));
        let retry = RetryPolicy::from_config(&config);
        let client = LeaderboardClient::with_transport(config, Arc::new(transport), retry);

        let leader = {
            let client = client.clone();
            thread::spawn(move || client.try_fetch_ranking())
        };
        while !client.is_loading() {
            thread::sleep(Duration::from_millis(1));
        }
        let follower = client.try_fetch_ranking();

        let leader = leader.join().unwrap();
        assert_eq!(leader.as_ref().map(RankingSnapshot::len), Ok(1));
        assert_eq!(follower.map(|s| s.entries), leader.map(|s| s.entries));
    }
}
