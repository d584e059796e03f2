use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use futures::future::join_all;

use crate::{
    error_strategy::FallbackPolicy, registry::FlagIdentifier, value::TypedValue,
    BooleanCastStrategy, Error, FlagConfig, RequestParameters, Result, ResultWithMetadata,
};

use super::{finalize, not_found, resolve_outcome, Evaluator, Resolution};

#[derive(Debug, Clone)]
enum BatchEntry {
    NotFound,
    Resolved {
        flag: Arc<FlagConfig>,
        policy: FallbackPolicy,
        resolution: Resolution,
    },
}

/// Results of a batch evaluation, keyed by the identifiers the batch was requested with.
///
/// Fetching a batch never fails. A flag whose effective error strategy is `FAIL` reports its
/// failure when its value is accessed.
#[derive(Debug, Clone)]
pub struct BatchResult {
    identifiers: Vec<String>,
    entries: HashMap<String, BatchEntry>,
    boolean_cast: BooleanCastStrategy,
}

impl BatchResult {
    /// Requested identifiers, in request order and without duplicates.
    pub fn flag_identifiers(&self) -> Vec<&str> {
        self.identifiers.iter().map(String::as_str).collect()
    }

    /// Number of distinct requested identifiers.
    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    /// Whether no identifier was requested.
    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Value of a boolean flag.
    ///
    /// # Errors
    ///
    /// [`Error::Failed`] if evaluation failed under the `FAIL` strategy.
    pub fn boolean_value(&self, identifier: &str) -> Result<bool> {
        self.boolean_value_details(identifier).map(|it| it.value)
    }

    /// Value of a boolean flag, with metadata.
    pub fn boolean_value_details(&self, identifier: &str) -> Result<ResultWithMetadata<bool>> {
        self.value_details(identifier)
    }

    /// Value of a string flag.
    pub fn string_value(&self, identifier: &str) -> Result<Option<String>> {
        self.string_value_details(identifier).map(|it| it.value)
    }

    /// Value of a string flag, with metadata.
    pub fn string_value_details(
        &self,
        identifier: &str,
    ) -> Result<ResultWithMetadata<Option<String>>> {
        self.value_details(identifier)
    }

    /// Value of a number flag.
    pub fn number_value(&self, identifier: &str) -> Result<Option<f64>> {
        self.number_value_details(identifier).map(|it| it.value)
    }

    /// Value of a number flag, with metadata.
    pub fn number_value_details(
        &self,
        identifier: &str,
    ) -> Result<ResultWithMetadata<Option<f64>>> {
        self.value_details(identifier)
    }

    /// Value of an object flag.
    pub fn object_value(&self, identifier: &str) -> Result<Option<serde_json::Value>> {
        self.object_value_details(identifier).map(|it| it.value)
    }

    /// Value of an object flag, with metadata.
    pub fn object_value_details(
        &self,
        identifier: &str,
    ) -> Result<ResultWithMetadata<Option<serde_json::Value>>> {
        self.value_details(identifier)
    }

    /// Identifiers that were not part of the batch are reported as not found.
    fn value_details<T: TypedValue>(&self, identifier: &str) -> Result<ResultWithMetadata<T>> {
        match self.entries.get(identifier) {
            None | Some(BatchEntry::NotFound) => Ok(not_found(identifier)),
            Some(BatchEntry::Resolved {
                flag,
                policy,
                resolution,
            }) => finalize(flag, policy, resolution, self.boolean_cast),
        }
    }
}

impl Evaluator {
    /// Evaluate many flags in a single store round trip.
    ///
    /// `identifiers` are expected to be all keys or all names. Unknown identifiers are left out
    /// of the store request.
    pub(crate) async fn evaluate_batch(
        &self,
        identifiers: Vec<FlagIdentifier>,
        params: &RequestParameters,
    ) -> BatchResult {
        let mut requested = Vec::with_capacity(identifiers.len());
        let mut seen = HashSet::with_capacity(identifiers.len());
        let mut entries = HashMap::with_capacity(identifiers.len());
        // (identifier, flag, policy) for flags that go to the store.
        let mut known = Vec::new();

        for identifier in identifiers {
            let id = identifier.as_str().to_owned();
            if !seen.insert(id.clone()) {
                continue;
            }
            requested.push(id.clone());

            match self.registry.lookup(&identifier) {
                Some(flag) => known.push((id, flag)),
                None => {
                    log::debug!(target: "izanami", flag = id.as_str(); "flag not found in registry");
                    entries.insert(id, BatchEntry::NotFound);
                }
            }
        }

        if !known.is_empty() {
            let flag_requests: Vec<_> = known
                .iter()
                .map(|(_, flag)| self.store_flag_request(flag, params))
                .collect();
            let policies: Vec<FallbackPolicy> =
                flag_requests.iter().map(|it| it.fallback.clone()).collect();

            let mut response = self
                .store
                .evaluate(params.store_request(flag_requests))
                .await;

            let outcomes: Vec<_> = known
                .iter()
                .map(|(_, flag)| match &mut response {
                    Ok(response) => response.remove(&flag.id).ok_or_else(|| {
                        Error::RemoteEvaluation {
                            key: flag.id.clone(),
                            message: "flag missing from store response".to_owned(),
                        }
                    }),
                    Err(err) => Err(err.clone()),
                })
                .collect();

            let resolutions = join_all(
                known
                    .iter()
                    .zip(&policies)
                    .zip(outcomes)
                    .map(|(((_, flag), policy), outcome)| resolve_outcome(flag, policy, outcome)),
            )
            .await;

            for (((id, flag), policy), resolution) in
                known.into_iter().zip(policies).zip(resolutions)
            {
                entries.insert(
                    id,
                    BatchEntry::Resolved {
                        flag,
                        policy,
                        resolution,
                    },
                );
            }
        }

        BatchResult {
            identifiers: requested,
            entries,
            boolean_cast: params.boolean_cast_strategy,
        }
    }
}
