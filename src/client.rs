use std::sync::Arc;

#[cfg(doc)]
use crate::Error;
use crate::{
    error_strategy::ErrorStrategyResolver,
    eval::Evaluator,
    registry::{FlagConfigRegistry, FlagIdentifier},
    store::FlagStore,
    BatchRequestBuilder, RequestBuilder,
};

/// Entry point for flag evaluation.
///
/// In order to create a resolver instance, first create a [`ResolverConfig`](crate::ResolverConfig).
/// The resolver is cheap to clone and can be shared between tasks: everything it holds is
/// read-only.
///
/// Evaluation never fails because a flag is unknown or the remote store is down. Instead, a
/// fallback value is returned and the `*_details` methods tell where it came from. The only
/// evaluation error is [`Error::Failed`], for flags whose effective error strategy is `FAIL`.
///
/// # Examples
/// ```
/// # use izanami_resolver::{FlagConfig, FlagValueType, InMemoryFlagStore, ResolverConfig};
/// # async fn run() -> izanami_resolver::Result<()> {
/// let store = InMemoryFlagStore::new();
/// store.set_value("2f5c0b7e", true);
///
/// let resolver = ResolverConfig::new(store)
///     .flags([FlagConfig::builder("2f5c0b7e", "pricing-v2")
///         .value_type(FlagValueType::Boolean)
///         .default_value(false)
///         .build()?])
///     .to_resolver()?;
///
/// let enabled = resolver.for_name("pricing-v2").with_user("alice").boolean_value().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FlagResolver {
    evaluator: Arc<Evaluator>,
}

impl FlagResolver {
    pub(crate) fn new(
        registry: FlagConfigRegistry,
        strategies: ErrorStrategyResolver,
        store: Arc<dyn FlagStore>,
    ) -> FlagResolver {
        FlagResolver {
            evaluator: Arc::new(Evaluator::new(registry, strategies, store)),
        }
    }

    /// Evaluate the flag with this key.
    pub fn for_key(&self, key: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(
            Arc::clone(&self.evaluator),
            FlagIdentifier::Key(key.into()),
        )
    }

    /// Evaluate the flag with this name.
    pub fn for_name(&self, name: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new(
            Arc::clone(&self.evaluator),
            FlagIdentifier::Name(name.into()),
        )
    }

    /// Evaluate flags with these keys in one round trip. Results are reported by key.
    pub fn for_keys<S: Into<String>>(
        &self,
        keys: impl IntoIterator<Item = S>,
    ) -> BatchRequestBuilder {
        BatchRequestBuilder::new(
            Arc::clone(&self.evaluator),
            keys.into_iter()
                .map(|key| FlagIdentifier::Key(key.into()))
                .collect(),
        )
    }

    /// Evaluate flags with these names in one round trip. Results are reported by name.
    pub fn for_names<S: Into<String>>(
        &self,
        names: impl IntoIterator<Item = S>,
    ) -> BatchRequestBuilder {
        BatchRequestBuilder::new(
            Arc::clone(&self.evaluator),
            names
                .into_iter()
                .map(|name| FlagIdentifier::Name(name.into()))
                .collect(),
        )
    }

    /// Registry of all known flags.
    pub fn registry(&self) -> &FlagConfigRegistry {
        self.evaluator.registry()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::{
        metadata::reason, FlagConfigSource, FlagValueSource, InMemoryFlagStore, ResolverConfig,
    };

    const FILE_CONFIG: &str = r#"{
        "flags": [
            {
                "id": "b1e0c2d4-0000-4000-8000-000000000001",
                "name": "pricing-v2",
                "valueType": "BOOLEAN",
                "defaultValue": false
            },
            {
                "id": "b1e0c2d4-0000-4000-8000-000000000002",
                "name": "discount-rate",
                "valueType": "DOUBLE",
                "defaultValue": 0.0
            }
        ]
    }"#;

    #[tokio::test]
    async fn programmatic_flags_override_file_flags() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value("b1e0c2d4-0000-4000-8000-000000000002", 0.15);
        store.set_value("override", 0.25);

        let resolver = ResolverConfig::with_shared_store(store)
            .flag_source(FlagConfigSource::from_json(FILE_CONFIG.as_bytes()).unwrap())
            .flags([crate::FlagConfig::builder("override", "discount-rate")
                .value_type(crate::FlagValueType::Double)
                .build()
                .unwrap()])
            .to_resolver()
            .unwrap();

        assert_eq!(resolver.registry().all().len(), 2);
        let rate = resolver.for_name("discount-rate").number_value().await.unwrap();
        assert_eq!(rate, Some(0.25));
    }

    #[tokio::test]
    async fn resolver_can_be_shared_between_tasks() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value("b1e0c2d4-0000-4000-8000-000000000002", 0.15);
        let resolver = ResolverConfig::with_shared_store(store)
            .flag_source(FlagConfigSource::from_json(FILE_CONFIG.as_bytes()).unwrap())
            .to_resolver()
            .unwrap();

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let resolver = resolver.clone();
                tokio::spawn(async move {
                    resolver
                        .for_name("discount-rate")
                        .number_value_details()
                        .await
                        .unwrap()
                })
            })
            .collect();

        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.value, Some(0.15));
            assert_eq!(result.source(), Some(FlagValueSource::Izanami));
            assert_eq!(result.reason(), Some(reason::ORIGIN_OR_CACHE));
        }
    }
}
