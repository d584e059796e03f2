use std::{collections::HashMap, sync::Arc};

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::{
    error_strategy::{ErrorStrategy, ErrorStrategyResolver, FallbackCallback},
    registry::FlagConfigRegistry,
    store::FlagStore,
    value, Error, FlagResolver, Result,
};

/// Type of the value a flag evaluates to.
#[derive(Debug, Display, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum FlagValueType {
    #[display("BOOLEAN")]
    Boolean,
    #[display("STRING")]
    String,
    #[display("INTEGER")]
    Integer,
    #[display("DOUBLE")]
    Double,
    #[display("OBJECT")]
    Object,
}

/// Error strategy configured for a flag.
#[derive(Debug, Display, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[allow(missing_docs)]
pub enum ErrorStrategyKind {
    #[default]
    #[display("DEFAULT_VALUE")]
    DefaultValue,
    #[display("FAIL")]
    Fail,
    #[display("NULL_VALUE")]
    NullValue,
    #[display("CALLBACK")]
    Callback,
}

/// Static configuration of a single flag.
///
/// `FlagConfig` is immutable once built. Use [`FlagConfig::builder`] to construct one
/// programmatically or [`FlagConfigSource::from_json`] to bind a list from a configuration file.
/// Both validate the flag, so the default value of a `FlagConfig` always agrees with its value
/// type. The fields are not public and a flag cannot be built from a struct literal:
///
/// ```compile_fail
/// # use izanami_resolver::{ErrorStrategyKind, FlagConfig, FlagValueType};
/// let flag = FlagConfig {
///     id: "k1".to_owned(),
///     name: "retries".to_owned(),
///     description: String::new(),
///     value_type: FlagValueType::Integer,
///     error_strategy: ErrorStrategyKind::DefaultValue,
///     default_value: Some(serde_json::json!("abc")),
///     callback: None,
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlagConfig {
    pub(crate) id: String,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) value_type: FlagValueType,
    pub(crate) error_strategy: ErrorStrategyKind,
    /// Normalized to agree with `value_type`.
    pub(crate) default_value: Option<serde_json::Value>,
    /// Only meaningful with [`ErrorStrategyKind::Callback`].
    pub(crate) callback: Option<String>,
}

impl FlagConfig {
    /// Start building a flag with the specified id and name.
    ///
    /// ```
    /// # use izanami_resolver::{FlagConfig, FlagValueType};
    /// let flag = FlagConfig::builder("d6e5b0a4-1d11-4fb0-9a55-5c1c0cde4ac8", "pricing-v2")
    ///     .value_type(FlagValueType::Boolean)
    ///     .default_value(false)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(flag.name(), "pricing-v2");
    /// ```
    pub fn builder(id: impl Into<String>, name: impl Into<String>) -> FlagConfigBuilder {
        FlagConfigBuilder {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            value_type: FlagValueType::Boolean,
            error_strategy: ErrorStrategyKind::default(),
            default_value: None,
            callback: None,
        }
    }

    /// Stable identifier of the flag on the remote store.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Human-friendly alias. Unique across the registry.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Free-form description, empty when not configured.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Type of the value the flag evaluates to.
    pub fn value_type(&self) -> FlagValueType {
        self.value_type
    }

    /// Kind of the configured error strategy.
    pub fn error_strategy_kind(&self) -> ErrorStrategyKind {
        self.error_strategy
    }

    /// Default value, normalized to agree with the value type.
    pub fn default_value(&self) -> Option<&serde_json::Value> {
        self.default_value.as_ref()
    }

    /// Name of the fallback callback, for the `CALLBACK` error strategy.
    pub fn callback(&self) -> Option<&str> {
        self.callback.as_deref()
    }

    /// Error strategy descriptor as configured for this flag.
    pub fn error_strategy(&self) -> ErrorStrategy {
        match self.error_strategy {
            ErrorStrategyKind::DefaultValue => ErrorStrategy::DefaultValue(None),
            ErrorStrategyKind::Fail => ErrorStrategy::Fail,
            ErrorStrategyKind::NullValue => ErrorStrategy::NullValue,
            ErrorStrategyKind::Callback => {
                ErrorStrategy::Callback(self.callback.clone().unwrap_or_default())
            }
        }
    }
}

/// Builder for [`FlagConfig`].
#[derive(Debug, Clone)]
pub struct FlagConfigBuilder {
    id: String,
    name: String,
    description: String,
    value_type: FlagValueType,
    error_strategy: ErrorStrategyKind,
    default_value: Option<serde_json::Value>,
    callback: Option<String>,
}

impl FlagConfigBuilder {
    /// Free-form description.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Type of the value the flag evaluates to. Defaults to `BOOLEAN`.
    pub fn value_type(mut self, value_type: FlagValueType) -> Self {
        self.value_type = value_type;
        self
    }

    /// Error strategy. Defaults to `DEFAULT_VALUE`. Use [`FlagConfigBuilder::callback`] for
    /// `CALLBACK`.
    pub fn error_strategy(mut self, error_strategy: ErrorStrategyKind) -> Self {
        self.error_strategy = error_strategy;
        self
    }

    /// Value served by the `DEFAULT_VALUE` strategy and by coercion fallbacks. Object defaults
    /// may be given as a JSON value or as a string holding JSON.
    pub fn default_value(mut self, default_value: impl Into<serde_json::Value>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }

    /// Use the `CALLBACK` error strategy with the callback registered under `callback`.
    pub fn callback(mut self, callback: impl Into<String>) -> Self {
        self.error_strategy = ErrorStrategyKind::Callback;
        self.callback = Some(callback.into());
        self
    }

    /// Validate and build the flag.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidDefaultValue`] if the default value does not agree with the value type.
    /// - [`Error::MissingCallback`] if the `CALLBACK` strategy is used without a callback name.
    pub fn build(self) -> Result<FlagConfig> {
        let default_value = match self.default_value {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => Some(value::normalize_default(self.value_type, value).ok_or_else(
                || Error::InvalidDefaultValue {
                    name: self.name.clone(),
                    expected: self.value_type,
                },
            )?),
        };

        if self.error_strategy == ErrorStrategyKind::Callback
            && self.callback.as_deref().map_or(true, str::is_empty)
        {
            return Err(Error::MissingCallback { name: self.name });
        }

        Ok(FlagConfig {
            id: self.id,
            name: self.name,
            description: self.description,
            value_type: self.value_type,
            error_strategy: self.error_strategy,
            default_value,
            callback: self.callback,
        })
    }
}

/// A list of flag configurations coming from a single source.
///
/// Sources are merged in registration order when the registry is built. See
/// [`registry::merge`](crate::registry::merge).
#[derive(Debug, Clone, Default)]
pub struct FlagConfigSource {
    flags: Vec<FlagConfig>,
}

/// Wire format of a declarative flag configuration document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlagConfigDocument {
    #[serde(default)]
    flags: Vec<FlagConfigWire>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FlagConfigWire {
    id: String,
    name: String,
    #[serde(default)]
    description: String,
    value_type: FlagValueType,
    #[serde(default)]
    error_strategy: ErrorStrategyKind,
    #[serde(default)]
    default_value: Option<serde_json::Value>,
    #[serde(default, alias = "callbackBean")]
    callback: Option<String>,
}

impl FlagConfigSource {
    /// Create a source from programmatically built flags.
    pub fn from_flags(flags: impl IntoIterator<Item = FlagConfig>) -> FlagConfigSource {
        FlagConfigSource {
            flags: flags.into_iter().collect(),
        }
    }

    /// Parse a declarative source.
    ///
    /// ```
    /// # use izanami_resolver::FlagConfigSource;
    /// let source = FlagConfigSource::from_json(br#"{
    ///   "flags": [{
    ///     "id": "4b9f3c6e-3a0f-4c53-b0b3-0c8a7a4d2f11",
    ///     "name": "discount-rate",
    ///     "valueType": "DOUBLE",
    ///     "defaultValue": 0.0
    ///   }]
    /// }"#).unwrap();
    /// assert_eq!(source.flags().len(), 1);
    /// ```
    pub fn from_json(json: &[u8]) -> Result<FlagConfigSource> {
        let document: FlagConfigDocument = serde_json::from_slice(json)
            .map_err(|err| Error::ConfigurationParseError(Arc::new(err)))?;

        let flags = document
            .flags
            .into_iter()
            .map(|wire| {
                let mut builder = FlagConfig::builder(wire.id, wire.name)
                    .description(wire.description)
                    .value_type(wire.value_type)
                    .error_strategy(wire.error_strategy);
                builder.default_value = wire.default_value;
                builder.callback = wire.callback;
                builder.build()
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(FlagConfigSource { flags })
    }

    /// Flags of this source, in declaration order.
    pub fn flags(&self) -> &[FlagConfig] {
        &self.flags
    }

    pub(crate) fn into_flags(self) -> Vec<FlagConfig> {
        self.flags
    }
}

/// Configuration for [`FlagResolver`].
pub struct ResolverConfig {
    pub(crate) store: Arc<dyn FlagStore>,
    pub(crate) sources: Vec<FlagConfigSource>,
    pub(crate) callbacks: HashMap<String, Arc<dyn FallbackCallback>>,
}

impl ResolverConfig {
    /// Create a configuration that evaluates flags against `store`.
    pub fn new(store: impl FlagStore + 'static) -> ResolverConfig {
        ResolverConfig::with_shared_store(Arc::new(store))
    }

    /// Create a configuration that evaluates flags against a store shared with the caller.
    pub fn with_shared_store(store: Arc<dyn FlagStore>) -> ResolverConfig {
        ResolverConfig {
            store,
            sources: Vec::new(),
            callbacks: HashMap::new(),
        }
    }

    /// Register a flag source. Sources registered later override flags with the same name.
    pub fn flag_source(mut self, source: FlagConfigSource) -> Self {
        self.sources.push(source);
        self
    }

    /// Register flags built with [`FlagConfig::builder`] as a separate source.
    pub fn flags(self, flags: impl IntoIterator<Item = FlagConfig>) -> Self {
        self.flag_source(FlagConfigSource::from_flags(flags))
    }

    /// Register a fallback callback under `name`.
    ///
    /// ```
    /// # use izanami_resolver::{FallbackContext, InMemoryFlagStore, ResolverConfig};
    /// let config = ResolverConfig::new(InMemoryFlagStore::new())
    ///     .callback("always-on", |_: &FallbackContext| serde_json::Value::Bool(true));
    /// ```
    pub fn callback(
        mut self,
        name: impl Into<String>,
        callback: impl FallbackCallback + 'static,
    ) -> Self {
        self.callbacks.insert(name.into(), Arc::new(callback));
        self
    }

    /// Merge all sources, validate callbacks and create a [`FlagResolver`].
    ///
    /// # Errors
    ///
    /// - [`Error::DuplicateFlagKey`] if two flags with different names share a key.
    /// - [`Error::UnknownCallback`] if a flag uses the `CALLBACK` strategy with a callback that
    ///   has not been registered.
    pub fn to_resolver(self) -> Result<FlagResolver> {
        let registry = FlagConfigRegistry::new(self.sources)?;
        let strategies = ErrorStrategyResolver::new(self.callbacks, &registry)?;
        Ok(FlagResolver::new(registry, strategies, self.store))
    }
}
