//! Boundary with the remote flag-evaluation service.
//!
//! The resolver does not talk to the network itself. It hands a [`StoreRequest`] to a
//! [`FlagStore`] implementation and interprets the [`StoreResponse`]. Timeouts, caching and
//! retries are the store client's business: the resolver only forwards the caller's options.
use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError, RwLock},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    error_strategy::{FallbackContext, FallbackOutcome, FallbackPolicy},
    Error, FlagValueType, Result,
};

/// A flag to evaluate, along with the fallback the store should apply if evaluation fails.
#[derive(Debug, Clone)]
pub struct StoreFlagRequest {
    /// Key of the flag.
    pub key: String,
    /// Value type of the flag.
    pub value_type: FlagValueType,
    /// Fallback to apply if the remote evaluation of this flag fails.
    pub fallback: FallbackPolicy,
}

/// A request for one or many flags in a single round trip.
#[derive(Debug, Clone, Default)]
pub struct StoreRequest {
    /// Flags to evaluate, without duplicates.
    pub flags: Vec<StoreFlagRequest>,
    /// User to evaluate for.
    pub user: Option<String>,
    /// Context path, e.g. `"prod/eu"`.
    pub context: Option<String>,
    /// Bypass any cache held by the store client.
    pub ignore_cache: bool,
    /// Timeout requested by the caller.
    pub timeout: Option<Duration>,
    /// Payload for script-based flags.
    pub payload: Option<String>,
}

/// Per-flag answer of the store.
#[derive(Debug, Clone, PartialEq)]
pub enum FlagOutcome {
    /// The remote service evaluated the flag. `null` means a disabled non-boolean flag.
    Success(Value),
    /// The remote service could not evaluate the flag. The store applied the flag's fallback.
    Error {
        /// Why the evaluation failed.
        message: String,
        /// Result of the flag's fallback.
        fallback: FallbackOutcome,
    },
}

impl FlagOutcome {
    /// Build an error outcome by applying the fallback requested for `flag`.
    pub async fn from_error(flag: &StoreFlagRequest, message: impl Into<String>) -> FlagOutcome {
        let message = message.into();
        let context = FallbackContext {
            key: flag.key.clone(),
            value_type: flag.value_type,
            error: message.clone(),
        };
        let fallback = flag.fallback.apply(&context).await;
        FlagOutcome::Error { message, fallback }
    }
}

/// Outcomes keyed by flag key.
pub type StoreResponse = HashMap<String, FlagOutcome>;

/// A client of the remote flag-evaluation service.
///
/// `evaluate` returns `Err` only when the service could not be queried at all (client
/// unavailable, transport failure). Failures to evaluate individual flags are reported as
/// [`FlagOutcome::Error`].
#[async_trait]
pub trait FlagStore: Send + Sync {
    /// Evaluate every flag of `request` in one round trip.
    async fn evaluate(&self, request: StoreRequest) -> Result<StoreResponse>;
}

#[derive(Debug, Clone)]
enum StoredFlag {
    Value(Value),
    Error(String),
}

#[derive(Debug, Default)]
struct InMemoryState {
    flags: HashMap<String, StoredFlag>,
    unavailable: Option<String>,
}

/// A [`FlagStore`] serving values from memory.
///
/// Useful for local development, offline mode and tests. Values and errors can be changed at
/// any time from any thread.
#[derive(Debug, Default)]
pub struct InMemoryFlagStore {
    state: RwLock<InMemoryState>,
    last_request: Mutex<Option<StoreRequest>>,
}

impl InMemoryFlagStore {
    /// An empty store. Every flag is missing until set.
    pub fn new() -> InMemoryFlagStore {
        InMemoryFlagStore::default()
    }

    /// Serve `value` for `key`.
    pub fn set_value(&self, key: impl Into<String>, value: impl Into<Value>) -> &Self {
        self.write_state()
            .flags
            .insert(key.into(), StoredFlag::Value(value.into()));
        self
    }

    /// Fail evaluation of `key` with `message`.
    pub fn set_error(&self, key: impl Into<String>, message: impl Into<String>) -> &Self {
        self.write_state()
            .flags
            .insert(key.into(), StoredFlag::Error(message.into()));
        self
    }

    /// Make every request fail as if the service could not be reached. `None` restores it.
    pub fn set_unavailable(&self, reason: Option<&str>) -> &Self {
        self.write_state().unavailable = reason.map(str::to_owned);
        self
    }

    /// The last request received.
    pub fn last_request(&self) -> Option<StoreRequest> {
        self.last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn write_state(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryState> {
        // A writer panicking while holding the lock does not leave the map half-updated.
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl FlagStore for InMemoryFlagStore {
    async fn evaluate(&self, request: StoreRequest) -> Result<StoreResponse> {
        *self
            .last_request
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(request.clone());

        // Snapshot under the lock, apply fallbacks after releasing it.
        let stored: Vec<(StoreFlagRequest, Option<StoredFlag>)> = {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(reason) = &state.unavailable {
                return Err(Error::RemoteUnavailable(reason.clone()));
            }
            request
                .flags
                .into_iter()
                .map(|flag| {
                    let value = state.flags.get(&flag.key).cloned();
                    (flag, value)
                })
                .collect()
        };

        let mut response = StoreResponse::with_capacity(stored.len());
        for (flag, value) in stored {
            let outcome = match value {
                Some(StoredFlag::Value(value)) => FlagOutcome::Success(value),
                Some(StoredFlag::Error(message)) => FlagOutcome::from_error(&flag, message).await,
                None => FlagOutcome::from_error(&flag, "flag does not exist on remote store").await,
            };
            response.insert(flag.key, outcome);
        }
        Ok(response)
    }
}
