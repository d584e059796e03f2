//! Result types and the metadata stamped on every evaluation result.
use std::collections::HashMap;

use derive_more::Display;
use serde::{Deserialize, Serialize};

use crate::FlagConfig;

/// Metadata key holding the flag id.
pub const FLAG_CONFIG_ID: &str = "FLAG_CONFIG_ID";
/// Metadata key holding the flag name.
pub const FLAG_CONFIG_NAME: &str = "FLAG_CONFIG_NAME";
/// Metadata key holding the flag description.
pub const FLAG_CONFIG_DESCRIPTION: &str = "FLAG_CONFIG_DESCRIPTION";
/// Metadata key holding the configured value type.
pub const FLAG_CONFIG_VALUE_TYPE: &str = "FLAG_CONFIG_VALUE_TYPE";
/// Metadata key holding the stringified configured default value.
pub const FLAG_CONFIG_DEFAULT_VALUE: &str = "FLAG_CONFIG_DEFAULT_VALUE";
/// Metadata key holding the configured error strategy.
pub const FLAG_CONFIG_ERROR_STRATEGY: &str = "FLAG_CONFIG_ERROR_STRATEGY";
/// Metadata key holding the [`FlagValueSource`]. Always present.
pub const FLAG_VALUE_SOURCE: &str = "FLAG_VALUE_SOURCE";
/// Metadata key holding the evaluation reason.
pub const FLAG_EVALUATION_REASON: &str = "FLAG_EVALUATION_REASON";

/// Evaluation reasons reported under [`FLAG_EVALUATION_REASON`].
pub mod reason {
    /// The remote store answered with a disabled flag.
    pub const DISABLED: &str = "DISABLED";
    /// The remote store (or its cache) answered with an active value.
    pub const ORIGIN_OR_CACHE: &str = "ORIGIN_OR_CACHE";
    /// A fallback value was served because of an error.
    pub const ERROR: &str = "ERROR";
    /// The flag is not in the registry.
    pub const FLAG_NOT_FOUND: &str = "FLAG_NOT_FOUND";
}

/// Where a flag value came from.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlagValueSource {
    /// The remote store evaluated the flag.
    #[display("IZANAMI")]
    Izanami,
    /// The remote store failed to evaluate the flag and its client applied the flag's fallback.
    #[display("IZANAMI_ERROR_STRATEGY")]
    IzanamiErrorStrategy,
    /// The remote store was never reached, or its answer could not be used.
    #[display("APPLICATION_ERROR_STRATEGY")]
    ApplicationErrorStrategy,
}

impl FlagValueSource {
    fn parse(s: &str) -> Option<FlagValueSource> {
        match s {
            "IZANAMI" => Some(FlagValueSource::Izanami),
            "IZANAMI_ERROR_STRATEGY" => Some(FlagValueSource::IzanamiErrorStrategy),
            "APPLICATION_ERROR_STRATEGY" => Some(FlagValueSource::ApplicationErrorStrategy),
            _ => None,
        }
    }
}

/// Hard error codes, for adapters that map results onto a standard evaluation API.
///
/// Results produced by a coercion fallback deliberately carry no error code, so that an adapter
/// does not replace the computed fallback with its own default.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The flag is not in the registry.
    #[display("FLAG_NOT_FOUND")]
    FlagNotFound,
    /// The flag store could not be queried.
    #[display("GENERAL")]
    General,
}

/// A flag value along with metadata describing how it was obtained.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultWithMetadata<T> {
    /// The flag value.
    pub value: T,
    /// Flag configuration and evaluation details, under the `FLAG_*` keys of this module.
    pub metadata: HashMap<String, String>,
    /// Set for flags that are not found and for store query failures.
    pub error_code: Option<ErrorCode>,
}

impl<T> ResultWithMetadata<T> {
    /// Where the value came from.
    pub fn source(&self) -> Option<FlagValueSource> {
        self.metadata
            .get(FLAG_VALUE_SOURCE)
            .and_then(|s| FlagValueSource::parse(s))
    }

    /// Evaluation reason, one of the [`reason`] constants.
    pub fn reason(&self) -> Option<&str> {
        self.metadata.get(FLAG_EVALUATION_REASON).map(String::as_str)
    }

    /// Map `ResultWithMetadata.value` using the `f` function.
    pub fn map<T2, F: FnOnce(T) -> T2>(self, f: F) -> ResultWithMetadata<T2> {
        ResultWithMetadata {
            value: f(self.value),
            metadata: self.metadata,
            error_code: self.error_code,
        }
    }
}

/// Build result metadata.
///
/// Flags missing from the registry (`flag == None`) only get the source and the reason.
pub fn build_metadata(
    flag: Option<&FlagConfig>,
    source: FlagValueSource,
    reason: &str,
) -> HashMap<String, String> {
    let mut metadata = HashMap::with_capacity(8);
    if let Some(flag) = flag {
        metadata.insert(FLAG_CONFIG_ID.to_owned(), flag.id.clone());
        metadata.insert(FLAG_CONFIG_NAME.to_owned(), flag.name.clone());
        metadata.insert(FLAG_CONFIG_DESCRIPTION.to_owned(), flag.description.clone());
        metadata.insert(FLAG_CONFIG_VALUE_TYPE.to_owned(), flag.value_type.to_string());
        metadata.insert(
            FLAG_CONFIG_DEFAULT_VALUE.to_owned(),
            match &flag.default_value {
                None => String::new(),
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
            },
        );
        metadata.insert(
            FLAG_CONFIG_ERROR_STRATEGY.to_owned(),
            flag.error_strategy.to_string(),
        );
    }
    metadata.insert(FLAG_VALUE_SOURCE.to_owned(), source.to_string());
    metadata.insert(FLAG_EVALUATION_REASON.to_owned(), reason.to_owned());
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ErrorStrategyKind, FlagValueType};

    #[test]
    fn includes_flag_configuration() {
        let flag = FlagConfig::builder("k1", "discount-rate")
            .description("Checkout discount")
            .value_type(FlagValueType::Double)
            .error_strategy(ErrorStrategyKind::NullValue)
            .default_value(0.0)
            .build()
            .unwrap();

        let metadata = build_metadata(
            Some(&flag),
            FlagValueSource::Izanami,
            reason::ORIGIN_OR_CACHE,
        );

        assert_eq!(metadata[FLAG_CONFIG_ID], "k1");
        assert_eq!(metadata[FLAG_CONFIG_NAME], "discount-rate");
        assert_eq!(metadata[FLAG_CONFIG_DESCRIPTION], "Checkout discount");
        assert_eq!(metadata[FLAG_CONFIG_VALUE_TYPE], "DOUBLE");
        assert_eq!(metadata[FLAG_CONFIG_DEFAULT_VALUE], "0.0");
        assert_eq!(metadata[FLAG_CONFIG_ERROR_STRATEGY], "NULL_VALUE");
        assert_eq!(metadata[FLAG_VALUE_SOURCE], "IZANAMI");
        assert_eq!(metadata[FLAG_EVALUATION_REASON], "ORIGIN_OR_CACHE");
    }

    #[test]
    fn unknown_flag_only_has_source_and_reason() {
        let metadata = build_metadata(
            None,
            FlagValueSource::ApplicationErrorStrategy,
            reason::FLAG_NOT_FOUND,
        );
        assert_eq!(metadata.len(), 2);

        let result = ResultWithMetadata {
            value: false,
            metadata,
            error_code: Some(ErrorCode::FlagNotFound),
        };
        assert_eq!(
            result.source(),
            Some(FlagValueSource::ApplicationErrorStrategy)
        );
        assert_eq!(result.reason(), Some(reason::FLAG_NOT_FOUND));
    }
}
