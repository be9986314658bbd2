//! Correlation registry for side-channel requests.
//!
//! Each attempt acquires a [`CallbackSlot`] under a fresh token. The remote
//! answer is delivered through [`CallbackResolver::resolve`]; the slot's
//! `Drop` removes both the handler and its injected-script marker, so the
//! registry is back to its pre-call state whatever way the attempt ended.

use crate::error::TransportError;
use chrono::Utc;
use log::debug;
use rand::Rng;
use rand::distr::Alphanumeric;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub type Completion = Result<Value, TransportError>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallbackToken(String);

impl CallbackToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug)]
pub struct CallbackRegistry {
    prefix: String,
    sequence: AtomicU64,
    handlers: Mutex<HashMap<CallbackToken, Sender<Completion>>>,
    scripts: Mutex<HashSet<CallbackToken>>,
}

impl CallbackRegistry {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            sequence: AtomicU64::new(0),
            handlers: Mutex::new(HashMap::new()),
            scripts: Mutex::new(HashSet::new()),
        }
    }

    /// Registers a one-shot handler under a token nobody else holds.
    pub fn acquire(self: &Arc<Self>) -> CallbackSlot {
        let token = self.next_token();
        let (sender, receiver) = mpsc::channel();
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.clone(), sender);
        debug!("Registered callback '{}'.", token);

        CallbackSlot {
            registry: Arc::clone(self),
            token,
            receiver,
        }
    }

    /// Delivers a completion to the handler registered under `token`.
    /// Returns false if the slot is already gone (late answer after timeout).
    pub fn resolve(&self, token: &str, completion: Completion) -> bool {
        let key = CallbackToken(token.to_string());
        let sender = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&key);

        match sender {
            Some(sender) => sender.send(completion).is_ok(),
            None => {
                debug!("Dropping completion for unknown callback '{}'.", token);
                false
            }
        }
    }

    pub fn pending_handlers(&self) -> usize {
        self.handlers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn injected_scripts(&self) -> usize {
        self.scripts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn next_token(&self) -> CallbackToken {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        let suffix: String = rand::rng()
            .sample_iter(Alphanumeric)
            .take(9)
            .map(char::from)
            .collect();
        CallbackToken(format!(
            "{}{}_{}_{}",
            self.prefix,
            Utc::now().timestamp_millis(),
            seq,
            suffix.to_ascii_lowercase()
        ))
    }

    fn release(&self, token: &CallbackToken) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
        debug!("Released callback '{}'.", token);
    }
}

/// An acquired correlation slot. Released on drop.
#[derive(Debug)]
pub struct CallbackSlot {
    registry: Arc<CallbackRegistry>,
    token: CallbackToken,
    receiver: Receiver<Completion>,
}

impl CallbackSlot {
    pub fn token(&self) -> &CallbackToken {
        &self.token
    }

    /// A `'static` handle the loader uses to report back.
    pub fn resolver(&self) -> CallbackResolver {
        CallbackResolver {
            registry: Arc::clone(&self.registry),
            token: self.token.clone(),
        }
    }

    /// Records that a script reference for this slot now exists.
    pub fn mark_injected(&self) {
        self.registry
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.token.clone());
    }

    pub fn wait(&self, timeout: Duration) -> Completion {
        match self.receiver.recv_timeout(timeout) {
            Ok(completion) => completion,
            Err(RecvTimeoutError::Timeout) => Err(TransportError::timed_out(timeout)),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::ScriptError(format!(
                "callback '{}' was unregistered before completing",
                self.token
            ))),
        }
    }
}

impl Drop for CallbackSlot {
    fn drop(&mut self) {
        self.registry.release(&self.token);
    }
}

#[derive(Debug, Clone)]
pub struct CallbackResolver {
    registry: Arc<CallbackRegistry>,
    token: CallbackToken,
}

impl CallbackResolver {
    pub fn token(&self) -> &CallbackToken {
        &self.token
    }

    pub fn resolve(self, completion: Completion) -> bool {
        self.registry.resolve(self.token.as_str(), completion)
    }
}
