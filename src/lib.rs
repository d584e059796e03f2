//! A resilient feature flag resolver for Izanami.
//!
//! # Overview
//!
//! The crate revolves around a [`FlagResolver`] that evaluates flags known to a
//! [`FlagConfigRegistry`](registry::FlagConfigRegistry) against a remote [`FlagStore`]. Flags are
//! identified either by their stable key or by their human-friendly name, and evaluation
//! produces a typed value along with metadata describing how the value was obtained.
//!
//! Flag configurations come from one or several [`FlagConfigSource`]s, either bound from a JSON
//! document or built with [`FlagConfig::builder`]. Sources are merged once, when the resolver is
//! created, and the resulting registry is immutable.
//!
//! # Fallback chain
//!
//! Evaluation never fails because of an unknown flag or an unreachable store. The value and its
//! [`FlagValueSource`] follow this chain:
//!
//! 1. the remote store evaluated the flag: [`FlagValueSource::Izanami`];
//! 2. the remote store failed to evaluate the flag, and its client applied the flag's error
//!    strategy: [`FlagValueSource::IzanamiErrorStrategy`];
//! 3. the store could not be queried, the flag is unknown, or the value could not be coerced:
//!    [`FlagValueSource::ApplicationErrorStrategy`].
//!
//! The only evaluation error is [`Error::Failed`], raised when the effective error strategy of a
//! flag is `FAIL`.
//!
//! # Logging
//!
//! The package uses the [`log`](https://docs.rs/log/latest/log/) crate with target `izanami`.
//! Consider integrating a `log`-compatible logger implementation for better visibility into
//! fallbacks.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error_strategy;
pub mod metadata;
pub mod registry;
pub mod store;
pub mod value;

mod client;
mod config;
mod error;
mod eval;
mod request;

pub use client::FlagResolver;
pub use config::{
    ErrorStrategyKind, FlagConfig, FlagConfigBuilder, FlagConfigSource, FlagValueType,
    ResolverConfig,
};
pub use error::{Error, Result};
pub use error_strategy::{ErrorStrategy, FallbackCallback, FallbackContext};
pub use eval::BatchResult;
pub use metadata::{ErrorCode, FlagValueSource, ResultWithMetadata};
pub use request::{BatchRequestBuilder, RequestBuilder, RequestParameters};
pub use store::{FlagStore, InMemoryFlagStore};
pub use value::BooleanCastStrategy;
