//! Flag evaluation: single flags, batches, and the fallback chain shared by both.
//!
//! Evaluation happens in two steps. First, the store outcome of a flag is turned into a
//! [`Resolution`], which is where fallbacks (possibly asynchronous callbacks) are applied. Then
//! the resolution is coerced to the requested type and stamped with metadata by
//! [`finalize`]. Batch results keep resolutions around and finalize on access.
mod batch;
mod single;

use std::sync::Arc;

use serde_json::Value;

pub use batch::BatchResult;

use crate::{
    error_strategy::{ErrorStrategyResolver, FallbackContext, FallbackOutcome, FallbackPolicy},
    metadata::{build_metadata, reason, ErrorCode, FlagValueSource},
    registry::FlagConfigRegistry,
    store::{FlagOutcome, FlagStore, StoreFlagRequest},
    value::{extract, DefaultSlots, TypedValue},
    BooleanCastStrategy, Error, FlagConfig, FlagValueType, Result, ResultWithMetadata,
};

/// Shared state of a [`FlagResolver`](crate::FlagResolver). Read-only once built.
pub(crate) struct Evaluator {
    registry: FlagConfigRegistry,
    strategies: ErrorStrategyResolver,
    store: Arc<dyn FlagStore>,
}

impl Evaluator {
    pub(crate) fn new(
        registry: FlagConfigRegistry,
        strategies: ErrorStrategyResolver,
        store: Arc<dyn FlagStore>,
    ) -> Evaluator {
        Evaluator {
            registry,
            strategies,
            store,
        }
    }

    pub(crate) fn registry(&self) -> &FlagConfigRegistry {
        &self.registry
    }

    fn store_flag_request(
        &self,
        flag: &FlagConfig,
        params: &crate::RequestParameters,
    ) -> StoreFlagRequest {
        let strategy = params.effective_strategy(flag);
        StoreFlagRequest {
            key: flag.id.clone(),
            value_type: flag.value_type,
            fallback: self.strategies.resolve(
                &strategy,
                flag.value_type,
                flag.default_value.as_ref(),
            ),
        }
    }
}

/// What the fallback chain produced for a flag, before coercion.
#[derive(Debug, Clone)]
pub(crate) enum Resolution {
    /// The remote service answered.
    Remote(Value),
    /// The remote service failed to evaluate the flag and the store applied its fallback.
    RemoteFallback(Value),
    /// The store could not be queried and the resolver applied the fallback itself.
    ApplicationFallback(Value),
    /// The effective strategy is `FAIL`.
    Failed {
        source: FlagValueSource,
        message: String,
    },
}

pub(crate) async fn resolve_outcome(
    flag: &FlagConfig,
    policy: &FallbackPolicy,
    outcome: Result<FlagOutcome>,
) -> Resolution {
    match outcome {
        Ok(FlagOutcome::Success(value)) => Resolution::Remote(value),
        Ok(FlagOutcome::Error {
            message,
            fallback: FallbackOutcome::Value(value),
        }) => {
            log::warn!(target: "izanami",
                flag_key = flag.id.as_str(),
                flag_name = flag.name.as_str();
                "remote evaluation failed, serving remote error strategy value: {}", message);
            Resolution::RemoteFallback(value)
        }
        Ok(FlagOutcome::Error {
            fallback: FallbackOutcome::Fail(message),
            ..
        }) => Resolution::Failed {
            source: FlagValueSource::IzanamiErrorStrategy,
            message,
        },
        Err(err) => {
            log::warn!(target: "izanami",
                flag_key = flag.id.as_str(),
                flag_name = flag.name.as_str();
                "failed to query flag store, applying application error strategy: {}", err);
            let context = FallbackContext {
                key: flag.id.clone(),
                value_type: flag.value_type,
                error: err.to_string(),
            };
            match policy.apply(&context).await {
                FallbackOutcome::Value(value) => Resolution::ApplicationFallback(value),
                FallbackOutcome::Fail(message) => Resolution::Failed {
                    source: FlagValueSource::ApplicationErrorStrategy,
                    message,
                },
            }
        }
    }
}

/// Coerce a resolution to `T` and attach metadata.
pub(crate) fn finalize<T: TypedValue>(
    flag: &FlagConfig,
    policy: &FallbackPolicy,
    resolution: &Resolution,
    boolean_cast: BooleanCastStrategy,
) -> Result<ResultWithMetadata<T>> {
    let (raw, source) = match resolution {
        Resolution::Remote(raw) => (raw, FlagValueSource::Izanami),
        Resolution::RemoteFallback(raw) => (raw, FlagValueSource::IzanamiErrorStrategy),
        Resolution::ApplicationFallback(raw) => (raw, FlagValueSource::ApplicationErrorStrategy),
        Resolution::Failed { source, message } => {
            log::debug!(target: "izanami",
                flag_key = flag.id.as_str(),
                source:serde = source;
                "evaluation failed with FAIL error strategy");
            return Err(Error::Failed {
                key: flag.id.clone(),
                message: message.clone(),
            });
        }
    };

    let value = match extract::<T>(flag.value_type, raw, boolean_cast) {
        Ok(value) => value,
        Err(err) => return Ok(coercion_fallback(flag, policy, err)),
    };

    let result = match source {
        FlagValueSource::Izanami => {
            let reason = if value.is_disabled() {
                reason::DISABLED
            } else {
                reason::ORIGIN_OR_CACHE
            };
            // A disabled non-boolean flag serves its default under the DEFAULT_VALUE strategy.
            let value = match policy {
                FallbackPolicy::DefaultValue(slots)
                    if raw.is_null() && flag.value_type != FlagValueType::Boolean =>
                {
                    slots.get::<T>()
                }
                _ => value,
            };
            ResultWithMetadata {
                value,
                metadata: build_metadata(Some(flag), source, reason),
                error_code: None,
            }
        }
        FlagValueSource::IzanamiErrorStrategy => ResultWithMetadata {
            value,
            metadata: build_metadata(Some(flag), source, reason::ERROR),
            error_code: None,
        },
        FlagValueSource::ApplicationErrorStrategy => ResultWithMetadata {
            value,
            metadata: build_metadata(Some(flag), source, reason::ERROR),
            error_code: Some(ErrorCode::General),
        },
    };

    log::trace!(target: "izanami",
        flag_key = flag.id.as_str(),
        flag_name = flag.name.as_str(),
        source:serde = source,
        reason = result.reason().unwrap_or_default();
        "evaluated a flag");

    Ok(result)
}

/// The value could not be coerced: serve the default of the effective `DEFAULT_VALUE` policy,
/// which holds a per-call default when one was supplied, or the configured default for any other
/// policy. No error code is attached, so that adapters keep this value instead of substituting
/// their own default.
fn coercion_fallback<T: TypedValue>(
    flag: &FlagConfig,
    policy: &FallbackPolicy,
    err: Error,
) -> ResultWithMetadata<T> {
    log::warn!(target: "izanami",
        flag_key = flag.id.as_str(),
        flag_name = flag.name.as_str(),
        value_type:serde = flag.value_type;
        "failed to coerce flag value, serving default value: {}", err);

    let value = match policy {
        FallbackPolicy::DefaultValue(slots) => slots.get::<T>(),
        _ => DefaultSlots::from_default(flag.default_value.as_ref()).get::<T>(),
    };

    ResultWithMetadata {
        value,
        metadata: build_metadata(
            Some(flag),
            FlagValueSource::ApplicationErrorStrategy,
            reason::ERROR,
        ),
        error_code: None,
    }
}

/// Result for a flag that is not in the registry.
pub(crate) fn not_found<T: TypedValue>(identifier: &str) -> ResultWithMetadata<T> {
    log::debug!(target: "izanami", flag = identifier; "flag not found in registry");
    ResultWithMetadata {
        value: T::not_found(),
        metadata: build_metadata(
            None,
            FlagValueSource::ApplicationErrorStrategy,
            reason::FLAG_NOT_FOUND,
        ),
        error_code: Some(ErrorCode::FlagNotFound),
    }
}
