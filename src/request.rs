//! Per-call evaluation options and the builders exposing them.
use std::{sync::Arc, time::Duration};

use crate::{
    error_strategy::ErrorStrategy,
    eval::{BatchResult, Evaluator},
    registry::FlagIdentifier,
    store::{StoreFlagRequest, StoreRequest},
    BooleanCastStrategy, FlagConfig, ResultWithMetadata, Result,
};

/// Options of a single evaluation call. Immutable once the call is issued.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestParameters {
    /// User to evaluate for.
    pub user: Option<String>,
    /// Context path, e.g. `"prod/eu"`.
    pub context: Option<String>,
    /// Ask the store client to bypass its cache.
    pub ignore_cache: bool,
    /// Forwarded to the store client. The resolver does not enforce it.
    pub call_timeout: Option<Duration>,
    /// Payload forwarded to script-based flags.
    pub payload: Option<String>,
    /// Conversion of non-boolean values for boolean getters.
    pub boolean_cast_strategy: BooleanCastStrategy,
    /// Supersedes the configured error strategy of every flag in this call.
    pub error_strategy: Option<ErrorStrategy>,
}

impl RequestParameters {
    pub(crate) fn effective_strategy(&self, flag: &FlagConfig) -> ErrorStrategy {
        self.error_strategy
            .clone()
            .unwrap_or_else(|| flag.error_strategy())
    }

    pub(crate) fn store_request(&self, flags: Vec<StoreFlagRequest>) -> StoreRequest {
        StoreRequest {
            flags,
            user: self.user.clone(),
            context: self.context.clone(),
            ignore_cache: self.ignore_cache,
            timeout: self.call_timeout,
            payload: self.payload.clone(),
        }
    }
}

macro_rules! request_options {
    () => {
        /// Evaluate for this user.
        pub fn with_user(mut self, user: impl Into<String>) -> Self {
            self.params.user = Some(user.into());
            self
        }

        /// Evaluate in this context.
        pub fn with_context(mut self, context: impl Into<String>) -> Self {
            self.params.context = Some(context.into());
            self
        }

        /// Ask the store client to bypass its cache.
        pub fn ignore_cache(mut self, ignore_cache: bool) -> Self {
            self.params.ignore_cache = ignore_cache;
            self
        }

        /// Timeout forwarded to the store client.
        pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
            self.params.call_timeout = Some(timeout);
            self
        }

        /// Payload forwarded to script-based flags.
        pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
            self.params.payload = Some(payload.into());
            self
        }

        /// How non-boolean values are read by boolean getters. Defaults to LAX.
        pub fn with_boolean_cast_strategy(mut self, strategy: BooleanCastStrategy) -> Self {
            self.params.boolean_cast_strategy = strategy;
            self
        }

        /// Override the configured error strategy for this call only.
        pub fn with_error_strategy(mut self, strategy: ErrorStrategy) -> Self {
            self.params.error_strategy = Some(strategy);
            self
        }

        /// Options collected so far.
        pub fn parameters(&self) -> &RequestParameters {
            &self.params
        }
    };
}

/// Builder for a single flag evaluation. Created by [`FlagResolver::for_key`] or
/// [`FlagResolver::for_name`].
///
/// Terminal methods return `Err` only when the effective error strategy of the flag is `FAIL`
/// and evaluation failed. In every other case a value is returned, along with metadata telling
/// where it came from for the `*_details` variants.
///
/// [`FlagResolver::for_key`]: crate::FlagResolver::for_key
/// [`FlagResolver::for_name`]: crate::FlagResolver::for_name
#[must_use = "a request does nothing until a terminal method is awaited"]
pub struct RequestBuilder {
    evaluator: Arc<Evaluator>,
    identifier: FlagIdentifier,
    params: RequestParameters,
}

impl RequestBuilder {
    pub(crate) fn new(evaluator: Arc<Evaluator>, identifier: FlagIdentifier) -> RequestBuilder {
        RequestBuilder {
            evaluator,
            identifier,
            params: RequestParameters::default(),
        }
    }

    request_options!();

    /// Evaluate the flag as a boolean.
    pub async fn boolean_value(self) -> Result<bool> {
        Ok(self.boolean_value_details().await?.value)
    }

    /// Evaluate the flag as a boolean, with metadata.
    pub async fn boolean_value_details(self) -> Result<ResultWithMetadata<bool>> {
        self.evaluator
            .evaluate(&self.identifier, &self.params)
            .await
    }

    /// Evaluate the flag as a string. `None` when the flag is disabled and no default applies.
    pub async fn string_value(self) -> Result<Option<String>> {
        Ok(self.string_value_details().await?.value)
    }

    /// Evaluate the flag as a string, with metadata.
    pub async fn string_value_details(self) -> Result<ResultWithMetadata<Option<String>>> {
        self.evaluator
            .evaluate(&self.identifier, &self.params)
            .await
    }

    /// Evaluate the flag as a number. `None` when the flag is disabled and no default applies.
    pub async fn number_value(self) -> Result<Option<f64>> {
        Ok(self.number_value_details().await?.value)
    }

    /// Evaluate the flag as a number, with metadata.
    pub async fn number_value_details(self) -> Result<ResultWithMetadata<Option<f64>>> {
        self.evaluator
            .evaluate(&self.identifier, &self.params)
            .await
    }

    /// The flag payload parsed as JSON. `None` when the flag is disabled and no default applies.
    pub async fn object_value(self) -> Result<Option<serde_json::Value>> {
        Ok(self.object_value_details().await?.value)
    }

    /// Evaluate the flag as a JSON object, with metadata.
    pub async fn object_value_details(
        self,
    ) -> Result<ResultWithMetadata<Option<serde_json::Value>>> {
        self.evaluator
            .evaluate(&self.identifier, &self.params)
            .await
    }
}

/// Builder for a batch evaluation. Created by [`FlagResolver::for_keys`] or
/// [`FlagResolver::for_names`].
///
/// [`FlagResolver::for_keys`]: crate::FlagResolver::for_keys
/// [`FlagResolver::for_names`]: crate::FlagResolver::for_names
#[must_use = "a request does nothing until `values()` is awaited"]
pub struct BatchRequestBuilder {
    evaluator: Arc<Evaluator>,
    identifiers: Vec<FlagIdentifier>,
    params: RequestParameters,
}

impl BatchRequestBuilder {
    pub(crate) fn new(
        evaluator: Arc<Evaluator>,
        identifiers: Vec<FlagIdentifier>,
    ) -> BatchRequestBuilder {
        BatchRequestBuilder {
            evaluator,
            identifiers,
            params: RequestParameters::default(),
        }
    }

    request_options!();

    /// Evaluate every flag in one round trip. Never fails: per-flag `FAIL` strategies are
    /// surfaced by the [`BatchResult`] accessors.
    pub async fn values(self) -> BatchResult {
        self.evaluator
            .evaluate_batch(self.identifiers, &self.params)
            .await
    }
}
