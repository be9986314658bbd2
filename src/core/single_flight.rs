use std::collections::HashMap;
use std::hash::Hash;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlightError {
    #[error("gave up waiting for the in-flight operation")]
    TimedOut,
    #[error("in-flight operation ended without a result")]
    Abandoned,
}

enum FlightState<T> {
    Running,
    Finished(T),
    Abandoned,
}

struct Flight<T> {
    state: Mutex<FlightState<T>>,
    done: Condvar,
    waiters: AtomicUsize,
}

/// Collapses concurrent calls for the same key into one execution.
///
/// The first caller (the leader) runs the work; callers arriving while it is
/// running block until it finishes and receive a clone of the same result.
/// Once the leader is done the key is free again, so the next call runs fresh.
pub struct SingleFlight<K, T> {
    flights: Mutex<HashMap<K, Arc<Flight<T>>>>,
}

impl<K, T> Default for SingleFlight<K, T> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }
}

impl<K: Eq + Hash + Clone, T: Clone> SingleFlight<K, T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    /// Number of callers currently parked on the in-flight call for `key`.
    pub fn waiters(&self, key: &K) -> usize {
        self.flights
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, |flight| flight.waiters.load(Ordering::SeqCst))
    }

    /// Runs `work` unless an identical call is already running, in which case
    /// waits at most `wait_bound` for that call's result.
    pub fn run(&self, key: K, wait_bound: Duration, work: impl FnOnce() -> T) -> Result<T, FlightError> {
        let (flight, is_leader) = {
            let mut flights = self.flights.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(existing) = flights.get(&key) {
                (Arc::clone(existing), false)
            } else {
                let flight = Arc::new(Flight {
                    state: Mutex::new(FlightState::Running),
                    done: Condvar::new(),
                    waiters: AtomicUsize::new(0),
                });
                flights.insert(key.clone(), Arc::clone(&flight));
                (flight, true)
            }
        };

        if !is_leader {
            flight.waiters.fetch_add(1, Ordering::SeqCst);
            let result = Self::wait(&flight, wait_bound);
            flight.waiters.fetch_sub(1, Ordering::SeqCst);
            return result;
        }

        let guard = LeaderGuard {
            owner: self,
            key,
            flight: Arc::clone(&flight),
        };
        let result = work();
        *flight.state.lock().unwrap_or_else(PoisonError::into_inner) =
            FlightState::Finished(result.clone());
        drop(guard);
        Ok(result)
    }

    /// A bound too large to express as a deadline waits for the leader.
    fn wait(flight: &Flight<T>, bound: Duration) -> Result<T, FlightError> {
        let deadline = Instant::now().checked_add(bound);
        let mut state = flight.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match &*state {
                FlightState::Finished(result) => return Ok(result.clone()),
                FlightState::Abandoned => return Err(FlightError::Abandoned),
                FlightState::Running => {}
            }
            state = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(FlightError::TimedOut);
                    }
                    flight
                        .done
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0
                }
                None => flight.done.wait(state).unwrap_or_else(PoisonError::into_inner),
            };
        }
    }
}

/// Frees the key and wakes waiters when the leader finishes or unwinds.
struct LeaderGuard<'a, K: Eq + Hash, T> {
    owner: &'a SingleFlight<K, T>,
    key: K,
    flight: Arc<Flight<T>>,
}

impl<K: Eq + Hash, T> Drop for LeaderGuard<'_, K, T> {
    fn drop(&mut self) {
        {
            let mut flights = self.owner.flights.lock().unwrap_or_else(PoisonError::into_inner);
            if flights
                .get(&self.key)
                .is_some_and(|current| Arc::ptr_eq(current, &self.flight))
            {
                flights.remove(&self.key);
            }
        }
        let mut state = self.flight.state.lock().unwrap_or_else(PoisonError::into_inner);
        if matches!(*state, FlightState::Running) {
            *state = FlightState::Abandoned;
        }
        drop(state);
        self.flight.done.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn wait_for_waiters<T: Clone>(flights: &SingleFlight<(), T>, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while flights.waiters(&()) < n {
            assert!(Instant::now() < deadline, "follower never parked");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn concurrent_callers_share_one_execution() {
        let flights: Arc<SingleFlight<(), u32>> = Arc::new(SingleFlight::new());
        let runs = Arc::new(AtomicUsize::new(0));
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let leader = {
            let flights = Arc::clone(&flights);
            let runs = Arc::clone(&runs);
            thread::spawn(move || {
                flights.run((), Duration::from_secs(5), || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    42
                })
            })
        };
        started_rx.recv().unwrap();
        assert!(flights.is_in_flight(&()));

        let follower = {
            let flights = Arc::clone(&flights);
            let runs = Arc::clone(&runs);
            thread::spawn(move || {
                flights.run((), Duration::from_secs(5), || {
                    runs.fetch_add(1, Ordering::SeqCst);
                    7
                })
            })
        };
        wait_for_waiters(&flights, 1);
        release_tx.send(()).unwrap();

        assert_eq!(leader.join().unwrap(), Ok(42));
        assert_eq!(follower.join().unwrap(), Ok(42));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!flights.is_in_flight(&()));
    }

    #[test]
    fn next_call_after_completion_runs_fresh() {
        let flights: SingleFlight<&str, u32> = SingleFlight::new();
        assert_eq!(flights.run("fetch", Duration::from_secs(1), || 1), Ok(1));
        assert_eq!(flights.run("fetch", Duration::from_secs(1), || 2), Ok(2));
    }

    #[test]
    fn waiter_gives_up_after_bound() {
        let flights: Arc<SingleFlight<(), u32>> = Arc::new(SingleFlight::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let leader = {
            let flights = Arc::clone(&flights);
            thread::spawn(move || {
                flights.run((), Duration::from_secs(5), || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    1
                })
            })
        };
        started_rx.recv().unwrap();

        assert_eq!(
            flights.run((), Duration::from_millis(20), || 2),
            Err(FlightError::TimedOut)
        );
        release_tx.send(()).unwrap();
        assert_eq!(leader.join().unwrap(), Ok(1));
    }

    #[test]
    fn panicking_leader_releases_waiters() {
        let flights: Arc<SingleFlight<(), u32>> = Arc::new(SingleFlight::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let leader = {
            let flights = Arc::clone(&flights);
            thread::spawn(move || {
                flights.run((), Duration::from_secs(5), || -> u32 {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    panic!("leader blew up");
                })
            })
        };
        started_rx.recv().unwrap();

        let follower = {
            let flights = Arc::clone(&flights);
            thread::spawn(move || flights.run((), Duration::from_secs(5), || 9))
        };
        wait_for_waiters(&flights, 1);
        release_tx.send(()).unwrap();

        assert!(leader.join().is_err());
        assert_eq!(follower.join().unwrap(), Err(FlightError::Abandoned));
        assert!(!flights.is_in_flight(&()));
    }

    #[test]
    fn unrepresentable_bound_waits_for_leader() {
        let flights: Arc<SingleFlight<(), u32>> = Arc::new(SingleFlight::new());
        let (started_tx, started_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let leader = {
            let flights = Arc::clone(&flights);
            thread::spawn(move || {
                flights.run((), Duration::from_secs(5), || {
                    started_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    5
                })
            })
        };
        started_rx.recv().unwrap();

        let follower = {
            let flights = Arc::clone(&flights);
            thread::spawn(move || flights.run((), Duration::MAX, || 6))
        };
        wait_for_waiters(&flights, 1);
        release_tx.send(()).unwrap();

        assert_eq!(leader.join().unwrap(), Ok(5));
        assert_eq!(follower.join().unwrap(), Ok(5));
    }
}
