use crate::{
    registry::FlagIdentifier, value::TypedValue, Error, RequestParameters, Result,
    ResultWithMetadata,
};

use super::{finalize, not_found, resolve_outcome, Evaluator};

impl Evaluator {
    /// Evaluate a single flag.
    ///
    /// Returns `Err` only when the effective error strategy is `FAIL` and evaluation failed.
    pub(crate) async fn evaluate<T: TypedValue>(
        &self,
        identifier: &FlagIdentifier,
        params: &RequestParameters,
    ) -> Result<ResultWithMetadata<T>> {
        let Some(flag) = self.registry.lookup(identifier) else {
            return Ok(not_found(identifier.as_str()));
        };

        let flag_request = self.store_flag_request(&flag, params);
        let policy = flag_request.fallback.clone();
        let request = params.store_request(vec![flag_request]);

        let outcome = self.store.evaluate(request).await.and_then(|mut response| {
            response
                .remove(&flag.id)
                .ok_or_else(|| Error::RemoteEvaluation {
                    key: flag.id.clone(),
                    message: "flag missing from store response".to_owned(),
                })
        });

        let resolution = resolve_outcome(&flag, &policy, outcome).await;
        finalize(&flag, &policy, &resolution, params.boolean_cast_strategy)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use async_trait::async_trait;
    use serde_json::{json, Value};

    use crate::{
        metadata::{reason, ErrorCode, FLAG_CONFIG_NAME},
        store::{FlagOutcome, StoreRequest, StoreResponse},
        BooleanCastStrategy, Error, ErrorStrategy, ErrorStrategyKind, FallbackContext, FlagConfig,
        FlagResolver, FlagStore, FlagValueSource, FlagValueType, InMemoryFlagStore,
        ResolverConfig, Result,
    };

    const PRICING: &str = "2f5c0b7e-6d0c-4f0e-8b5e-1b9f6b0c9a01";
    const DISCOUNT: &str = "7e1d3a59-0b47-4b5e-9c3f-2f6a8d4e5b02";
    const BANNER: &str = "c3a9e8f1-4d2b-4e6a-8f7c-5d1e2a3b4c03";
    const GREETING: &str = "a8b7c6d5-e4f3-4a2b-9c1d-0e9f8a7b6c04";
    const RETRIES: &str = "d4c3b2a1-f0e9-4d8c-b7a6-958473625104";

    fn flags() -> Vec<FlagConfig> {
        vec![
            FlagConfig::builder(PRICING, "pricing-v2")
                .value_type(FlagValueType::Boolean)
                .default_value(false)
                .build()
                .unwrap(),
            FlagConfig::builder(DISCOUNT, "discount-rate")
                .value_type(FlagValueType::Double)
                .default_value(0.0)
                .build()
                .unwrap(),
            FlagConfig::builder(BANNER, "banner")
                .value_type(FlagValueType::Object)
                .default_value(json!({"color": "blue"}))
                .build()
                .unwrap(),
            FlagConfig::builder(GREETING, "greeting")
                .value_type(FlagValueType::String)
                .default_value("hello")
                .build()
                .unwrap(),
            FlagConfig::builder(RETRIES, "retries")
                .value_type(FlagValueType::Integer)
                .error_strategy(ErrorStrategyKind::Fail)
                .default_value(3)
                .build()
                .unwrap(),
        ]
    }

    fn resolver(store: Arc<InMemoryFlagStore>) -> FlagResolver {
        ResolverConfig::with_shared_store(store)
            .flags(flags())
            .callback("half", |_: &FallbackContext| json!(0.5))
            .to_resolver()
            .unwrap()
    }

    #[tokio::test]
    async fn unknown_flags_get_type_defaults() {
        let resolver = resolver(Arc::new(InMemoryFlagStore::new()));

        let boolean = resolver.for_key("nope").boolean_value_details().await.unwrap();
        assert_eq!(boolean.value, false);
        assert_eq!(
            boolean.source(),
            Some(FlagValueSource::ApplicationErrorStrategy)
        );
        assert_eq!(boolean.reason(), Some(reason::FLAG_NOT_FOUND));
        assert_eq!(boolean.error_code, Some(ErrorCode::FlagNotFound));

        let string = resolver.for_name("nope").string_value_details().await.unwrap();
        assert_eq!(string.value.as_deref(), Some(""));
        assert_eq!(string.reason(), Some(reason::FLAG_NOT_FOUND));

        let number = resolver.for_key("nope").number_value_details().await.unwrap();
        assert_eq!(number.value, Some(0.0));
        assert_eq!(
            number.source(),
            Some(FlagValueSource::ApplicationErrorStrategy)
        );
    }

    #[tokio::test]
    async fn not_found_never_fails_even_with_fail_override() {
        let resolver = resolver(Arc::new(InMemoryFlagStore::new()));
        let value = resolver
            .for_key("nope")
            .with_error_strategy(ErrorStrategy::Fail)
            .boolean_value()
            .await
            .unwrap();
        assert!(!value);
    }

    #[tokio::test]
    async fn remote_true_overrides_false_default() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value(PRICING, true);
        let resolver = resolver(store);

        let result = resolver.for_name("pricing-v2").boolean_value_details().await.unwrap();
        assert!(result.value);
        assert_eq!(result.source(), Some(FlagValueSource::Izanami));
        assert_eq!(result.reason(), Some(reason::ORIGIN_OR_CACHE));
        assert_eq!(result.metadata[FLAG_CONFIG_NAME], "pricing-v2");
        assert_eq!(result.error_code, None);
    }

    #[tokio::test]
    async fn remote_false_is_disabled() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value(PRICING, false);
        let resolver = resolver(store);

        let result = resolver.for_key(PRICING).boolean_value_details().await.unwrap();
        assert!(!result.value);
        assert_eq!(result.source(), Some(FlagValueSource::Izanami));
        assert_eq!(result.reason(), Some(reason::DISABLED));
    }

    #[tokio::test]
    async fn disabled_non_boolean_flags_serve_configured_default() {
        let store = Arc::new(InMemoryFlagStore::new());
        store
            .set_value(GREETING, Value::Null)
            .set_value(DISCOUNT, Value::Null);
        let resolver = resolver(store);

        let greeting = resolver.for_key(GREETING).string_value_details().await.unwrap();
        assert_eq!(greeting.value.as_deref(), Some("hello"));
        assert_eq!(greeting.source(), Some(FlagValueSource::Izanami));
        assert_eq!(greeting.reason(), Some(reason::DISABLED));

        let discount = resolver.for_key(DISCOUNT).number_value_details().await.unwrap();
        assert_eq!(discount.value, Some(0.0));
        assert_eq!(discount.reason(), Some(reason::DISABLED));
    }

    #[tokio::test]
    async fn disabled_flag_with_null_strategy_stays_null() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value(GREETING, Value::Null);
        let resolver = resolver(store);

        let greeting = resolver
            .for_key(GREETING)
            .with_error_strategy(ErrorStrategy::NullValue)
            .string_value_details()
            .await
            .unwrap();
        assert_eq!(greeting.value, None);
        assert_eq!(greeting.reason(), Some(reason::DISABLED));
    }

    #[tokio::test]
    async fn remote_number_is_served() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value(DISCOUNT, 0.15);
        let resolver = resolver(store);

        let result = resolver.for_name("discount-rate").number_value_details().await.unwrap();
        assert_eq!(result.value, Some(0.15));
        assert_eq!(result.source(), Some(FlagValueSource::Izanami));
    }

    #[tokio::test]
    async fn non_finite_number_serves_default() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value(DISCOUNT, "NaN");
        let resolver = resolver(store);

        let result = resolver.for_key(DISCOUNT).number_value_details().await.unwrap();
        assert_eq!(result.value, Some(0.0));
        assert_eq!(result.reason(), Some(reason::ERROR));
    }

    #[tokio::test]
    async fn unavailable_store_serves_application_default() {
        let _ = env_logger::builder().is_test(true).try_init();

        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value(PRICING, true).set_unavailable(Some("connection refused"));
        let resolver = resolver(store);

        let result = resolver.for_name("pricing-v2").boolean_value_details().await.unwrap();
        assert!(!result.value);
        assert_eq!(
            result.source(),
            Some(FlagValueSource::ApplicationErrorStrategy)
        );
        assert_eq!(result.reason(), Some(reason::ERROR));
        assert_eq!(result.error_code, Some(ErrorCode::General));
    }

    #[tokio::test]
    async fn remote_error_is_served_by_store_fallback() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_error(GREETING, "script failed");
        let resolver = resolver(store);

        let result = resolver.for_key(GREETING).string_value_details().await.unwrap();
        assert_eq!(result.value.as_deref(), Some("hello"));
        assert_eq!(result.source(), Some(FlagValueSource::IzanamiErrorStrategy));
        assert_eq!(result.reason(), Some(reason::ERROR));
    }

    #[tokio::test]
    async fn fail_strategy_surfaces_errors() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_error(RETRIES, "script failed");
        let resolver = resolver(Arc::clone(&store));

        let result = resolver.for_key(RETRIES).number_value().await;
        assert!(matches!(result, Err(Error::Failed { key, .. }) if key == RETRIES));

        store.set_unavailable(Some("timeout"));
        let result = resolver.for_key(RETRIES).number_value().await;
        assert!(matches!(result, Err(Error::Failed { .. })));
    }

    #[tokio::test]
    async fn per_call_override_supersedes_configured_strategy() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_error(RETRIES, "script failed");
        let resolver = resolver(store);

        let result = resolver
            .for_key(RETRIES)
            .with_error_strategy(ErrorStrategy::DefaultValue(Some(json!(5))))
            .number_value_details()
            .await
            .unwrap();
        assert_eq!(result.value, Some(5.0));
        assert_eq!(result.source(), Some(FlagValueSource::IzanamiErrorStrategy));

        let result = resolver
            .for_key(RETRIES)
            .with_error_strategy(ErrorStrategy::Callback("half".to_owned()))
            .number_value()
            .await;
        // 0.5 is not a valid integer: coercion fails and the configured default is served.
        assert_eq!(result.unwrap(), Some(3.0));
    }

    #[tokio::test]
    async fn callback_strategy_runs_when_store_is_unavailable() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_unavailable(Some("down"));
        let resolver = ResolverConfig::with_shared_store(store)
            .flags([FlagConfig::builder("k", "rate")
                .value_type(FlagValueType::Double)
                .callback("half")
                .build()
                .unwrap()])
            .callback("half", |_: &FallbackContext| json!(0.5))
            .to_resolver()
            .unwrap();

        let result = resolver.for_name("rate").number_value_details().await.unwrap();
        assert_eq!(result.value, Some(0.5));
        assert_eq!(
            result.source(),
            Some(FlagValueSource::ApplicationErrorStrategy)
        );
    }

    #[tokio::test]
    async fn object_flags_parse_json_payload() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value(BANNER, "{\"color\":\"red\",\"size\":2}");
        let resolver = resolver(store);

        let value = resolver.for_key(BANNER).object_value().await.unwrap();
        assert_eq!(value, Some(json!({"color": "red", "size": 2})));
    }

    #[tokio::test]
    async fn malformed_object_payload_serves_default_without_error_code() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value(BANNER, "{\"color\":");
        let resolver = resolver(store);

        let result = resolver.for_key(BANNER).object_value_details().await.unwrap();
        assert_eq!(result.value, Some(json!({"color": "blue"})));
        assert_eq!(result.reason(), Some(reason::ERROR));
        assert_eq!(
            result.source(),
            Some(FlagValueSource::ApplicationErrorStrategy)
        );
        assert_eq!(result.error_code, None);
    }

    #[tokio::test]
    async fn malformed_object_payload_serves_per_call_default() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value(BANNER, "{\"color\":");
        let resolver = resolver(store);

        let result = resolver
            .for_key(BANNER)
            .with_error_strategy(ErrorStrategy::DefaultValue(Some(json!({"color": "green"}))))
            .object_value_details()
            .await
            .unwrap();
        assert_eq!(result.value, Some(json!({"color": "green"})));
        assert_eq!(result.reason(), Some(reason::ERROR));
        assert_eq!(result.error_code, None);
    }

    #[tokio::test]
    async fn strict_cast_failure_serves_per_call_default() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value(PRICING, "true");
        let resolver = resolver(store);

        let value = resolver
            .for_key(PRICING)
            .with_boolean_cast_strategy(BooleanCastStrategy::Strict)
            .with_error_strategy(ErrorStrategy::DefaultValue(Some(json!(true))))
            .boolean_value()
            .await
            .unwrap();
        assert!(value);
    }

    #[tokio::test]
    async fn strict_boolean_cast_rejects_non_booleans() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value(PRICING, "true");
        let resolver = resolver(store);

        let lax = resolver.for_key(PRICING).boolean_value_details().await.unwrap();
        assert!(lax.value);
        assert_eq!(lax.source(), Some(FlagValueSource::Izanami));

        let strict = resolver
            .for_key(PRICING)
            .with_boolean_cast_strategy(BooleanCastStrategy::Strict)
            .boolean_value_details()
            .await
            .unwrap();
        assert!(!strict.value);
        assert_eq!(strict.reason(), Some(reason::ERROR));
        assert_eq!(strict.error_code, None);
    }

    #[tokio::test]
    async fn evaluation_is_idempotent() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value(DISCOUNT, 0.15);
        let resolver = resolver(store);

        let first = resolver.for_key(DISCOUNT).with_user("alice").number_value_details().await;
        let second = resolver.for_key(DISCOUNT).with_user("alice").number_value_details().await;
        assert_eq!(first.unwrap(), second.unwrap());
    }

    #[tokio::test]
    async fn forwards_request_options_to_store() {
        let store = Arc::new(InMemoryFlagStore::new());
        store.set_value(PRICING, true);
        let resolver = resolver(Arc::clone(&store));

        resolver
            .for_key(PRICING)
            .with_user("alice")
            .with_context("prod/eu")
            .ignore_cache(true)
            .with_call_timeout(Duration::from_secs(2))
            .with_payload("{\"cart\":3}")
            .boolean_value()
            .await
            .unwrap();

        let request = store.last_request().unwrap();
        assert_eq!(request.flags.len(), 1);
        assert_eq!(request.flags[0].key, PRICING);
        assert_eq!(request.flags[0].fallback.kind(), ErrorStrategyKind::DefaultValue);
        assert_eq!(request.user.as_deref(), Some("alice"));
        assert_eq!(request.context.as_deref(), Some("prod/eu"));
        assert!(request.ignore_cache);
        assert_eq!(request.timeout, Some(Duration::from_secs(2)));
        assert_eq!(request.payload.as_deref(), Some("{\"cart\":3}"));
    }

    /// A store that answers without the requested flag.
    struct ForgetfulStore;

    #[async_trait]
    impl FlagStore for ForgetfulStore {
        async fn evaluate(&self, _request: StoreRequest) -> Result<StoreResponse> {
            Ok(StoreResponse::from([(
                "someone-else".to_owned(),
                FlagOutcome::Success(json!(true)),
            )]))
        }
    }

    #[tokio::test]
    async fn missing_flag_in_response_is_a_query_failure() {
        let resolver = ResolverConfig::new(ForgetfulStore)
            .flags(flags())
            .callback("half", |_: &FallbackContext| json!(0.5))
            .to_resolver()
            .unwrap();

        let result = resolver.for_key(GREETING).string_value_details().await.unwrap();
        assert_eq!(result.value.as_deref(), Some("hello"));
        assert_eq!(
            result.source(),
            Some(FlagValueSource::ApplicationErrorStrategy)
        );
    }
}
