//! Turns error strategy descriptors into executable fallback policies.
//!
//! A [`FallbackPolicy`] is handed to the [`FlagStore`](crate::store::FlagStore) with every flag,
//! so the store client can apply it locally when the remote evaluation fails. The resolver
//! applies the same policy itself when the store cannot be queried at all.
use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use serde_json::Value;

use crate::{
    registry::FlagConfigRegistry, value::DefaultSlots, Error, ErrorStrategyKind, FlagValueType,
    Result,
};

/// Error strategy descriptor: either configured on a flag or supplied as a per-call override.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorStrategy {
    /// Serve a default value. `None` uses the default value configured for the flag.
    DefaultValue(Option<Value>),
    /// Surface the error to the caller.
    Fail,
    /// Serve `null` (`false` for boolean flags).
    NullValue,
    /// Ask the callback registered under this name.
    Callback(String),
}

impl ErrorStrategy {
    /// Kind of this strategy, as reported in result metadata.
    pub fn kind(&self) -> ErrorStrategyKind {
        match self {
            ErrorStrategy::DefaultValue(_) => ErrorStrategyKind::DefaultValue,
            ErrorStrategy::Fail => ErrorStrategyKind::Fail,
            ErrorStrategy::NullValue => ErrorStrategyKind::NullValue,
            ErrorStrategy::Callback(_) => ErrorStrategyKind::Callback,
        }
    }
}

/// Information passed to a fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct FallbackContext {
    /// Key of the flag.
    pub key: String,
    /// Value type of the flag.
    pub value_type: FlagValueType,
    /// Description of the error that triggered the fallback.
    pub error: String,
}

/// A named fallback registered with [`ResolverConfig::callback`](crate::ResolverConfig::callback).
///
/// The returned value is coerced to the flag type like any remote value.
#[async_trait]
pub trait FallbackCallback: Send + Sync {
    /// Produce a fallback value. An `Err` serves the flag's default value instead.
    async fn fallback(&self, context: &FallbackContext) -> Result<Value>;
}

#[async_trait]
impl<F> FallbackCallback for F
where
    F: Fn(&FallbackContext) -> Value + Send + Sync,
{
    async fn fallback(&self, context: &FallbackContext) -> Result<Value> {
        Ok(self(context))
    }
}

/// Result of applying a [`FallbackPolicy`].
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackOutcome {
    /// A raw fallback value, coerced later the same way as a remote value.
    Value(Value),
    /// The policy is `FAIL`. Holds the error message.
    Fail(String),
}

/// An executable fallback.
#[derive(Clone)]
pub enum FallbackPolicy {
    /// Serve a default value.
    DefaultValue(DefaultSlots),
    /// Report the error.
    Fail,
    /// Serve `null`, or `false` for boolean flags.
    NullValue,
    /// Ask a registered callback.
    Callback {
        /// Name the callback is registered under.
        name: String,
        /// The callback itself.
        callback: Arc<dyn FallbackCallback>,
        /// Served when the callback itself fails.
        defaults: DefaultSlots,
    },
}

impl fmt::Debug for FallbackPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackPolicy::DefaultValue(slots) => {
                f.debug_tuple("DefaultValue").field(slots).finish()
            }
            FallbackPolicy::Fail => f.write_str("Fail"),
            FallbackPolicy::NullValue => f.write_str("NullValue"),
            FallbackPolicy::Callback { name, .. } => {
                f.debug_struct("Callback").field("name", name).finish()
            }
        }
    }
}

impl FallbackPolicy {
    /// Kind of the error strategy this policy implements.
    pub fn kind(&self) -> ErrorStrategyKind {
        match self {
            FallbackPolicy::DefaultValue(_) => ErrorStrategyKind::DefaultValue,
            FallbackPolicy::Fail => ErrorStrategyKind::Fail,
            FallbackPolicy::NullValue => ErrorStrategyKind::NullValue,
            FallbackPolicy::Callback { .. } => ErrorStrategyKind::Callback,
        }
    }

    /// Compute the fallback value for a failed evaluation.
    pub async fn apply(&self, context: &FallbackContext) -> FallbackOutcome {
        match self {
            FallbackPolicy::DefaultValue(slots) => {
                FallbackOutcome::Value(slots.to_raw(context.value_type))
            }
            FallbackPolicy::Fail => FallbackOutcome::Fail(context.error.clone()),
            FallbackPolicy::NullValue => FallbackOutcome::Value(match context.value_type {
                FlagValueType::Boolean => Value::Bool(false),
                _ => Value::Null,
            }),
            FallbackPolicy::Callback {
                name,
                callback,
                defaults,
            } => match callback.fallback(context).await {
                Ok(value) => FallbackOutcome::Value(value),
                Err(err) => {
                    log::warn!(target: "izanami",
                        flag_key = context.key.as_str(),
                        callback = name.as_str();
                        "fallback callback failed, serving default value: {}", err);
                    FallbackOutcome::Value(defaults.to_raw(context.value_type))
                }
            },
        }
    }
}

/// Resolves [`ErrorStrategy`] descriptors into [`FallbackPolicy`] objects.
///
/// Callbacks are looked up by name once, when the resolver is created, so a misspelled callback
/// name is reported at startup.
#[derive(Clone, Default)]
pub struct ErrorStrategyResolver {
    callbacks: HashMap<String, Arc<dyn FallbackCallback>>,
}

impl ErrorStrategyResolver {
    /// Create a resolver, checking that every flag using the `CALLBACK` strategy names a
    /// registered callback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownCallback`] for the first flag referencing an unknown callback.
    pub fn new(
        callbacks: HashMap<String, Arc<dyn FallbackCallback>>,
        registry: &FlagConfigRegistry,
    ) -> Result<ErrorStrategyResolver> {
        for flag in registry.all() {
            if let ErrorStrategy::Callback(callback) = flag.error_strategy() {
                if !callbacks.contains_key(&callback) {
                    return Err(Error::UnknownCallback {
                        name: flag.name.clone(),
                        callback,
                    });
                }
            }
        }

        Ok(ErrorStrategyResolver { callbacks })
    }

    /// Resolve `strategy` for a flag of `value_type` configured with `default_value`.
    ///
    /// A callback that is not registered (only possible through a per-call override) degrades to
    /// a default value fallback.
    pub fn resolve(
        &self,
        strategy: &ErrorStrategy,
        value_type: FlagValueType,
        default_value: Option<&Value>,
    ) -> FallbackPolicy {
        let defaults = || DefaultSlots::from_default(default_value);
        match strategy {
            ErrorStrategy::DefaultValue(None) => FallbackPolicy::DefaultValue(defaults()),
            ErrorStrategy::DefaultValue(Some(value)) => {
                FallbackPolicy::DefaultValue(DefaultSlots::from_default(Some(value)))
            }
            ErrorStrategy::Fail => FallbackPolicy::Fail,
            ErrorStrategy::NullValue => FallbackPolicy::NullValue,
            ErrorStrategy::Callback(name) => match self.callbacks.get(name) {
                Some(callback) => FallbackPolicy::Callback {
                    name: name.clone(),
                    callback: Arc::clone(callback),
                    defaults: defaults(),
                },
                None => {
                    log::warn!(target: "izanami",
                        callback = name.as_str(),
                        value_type:serde = value_type;
                        "unknown fallback callback, using default value strategy");
                    FallbackPolicy::DefaultValue(defaults())
                }
            },
        }
    }
}
