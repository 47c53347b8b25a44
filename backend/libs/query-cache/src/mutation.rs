//! Mutation coordinator
//!
//! Runs a write and, once it succeeds, drops the cache entries it made stale
//! before returning. The change notification for the same write may arrive
//! later and invalidate again; that second pass is harmless.

use std::fmt;
use std::future::Future;
use tracing::debug;

use crate::executor::QueryExecutor;
use crate::keys::QueryKey;
use crate::QueryError;

/// Prefixes to invalidate after one successful write, in order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MutationRecord {
    affected_prefixes: Vec<String>,
    version: Option<u32>,
}

impl MutationRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build later [`resource`](Self::resource) and [`entity`](Self::entity)
    /// prefixes under schema version `version`, matching versioned keys.
    /// Prefixes already added are left as they are.
    pub fn versioned(mut self, version: u32) -> Self {
        self.version = Some(version);
        self
    }

    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.affected_prefixes.push(prefix.into());
        self
    }

    /// Every cached read of `resource`
    pub fn resource(self, resource: &str) -> Self {
        let prefix = self.key(resource).prefix();
        self.prefix(prefix)
    }

    /// One entity and the reads keyed under it
    pub fn entity(self, resource: &str, id: impl fmt::Display) -> Self {
        let prefix = self.key(resource).param(id).build();
        self.prefix(prefix)
    }

    pub fn affected_prefixes(&self) -> &[String] {
        &self.affected_prefixes
    }

    pub fn is_empty(&self) -> bool {
        self.affected_prefixes.is_empty()
    }

    fn key(&self, resource: &str) -> QueryKey {
        match self.version {
            Some(version) => QueryKey::new(resource).versioned(version),
            None => QueryKey::new(resource),
        }
    }
}

impl<S: Into<String>> FromIterator<S> for MutationRecord {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            affected_prefixes: iter.into_iter().map(Into::into).collect(),
            version: None,
        }
    }
}

/// Write-path invalidation
#[derive(Clone)]
pub struct MutationCoordinator {
    executor: QueryExecutor,
}

impl MutationCoordinator {
    pub fn new(executor: QueryExecutor) -> Self {
        Self { executor }
    }

    /// Run `write`; on success invalidate every affected prefix, then return.
    ///
    /// On failure nothing is invalidated and the caller's error comes back as
    /// [`QueryError::WriteFailed`].
    pub async fn mutate<T, E, F, Fut>(
        &self,
        write: F,
        record: &MutationRecord,
    ) -> Result<T, QueryError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let value = write().await.map_err(QueryError::WriteFailed)?;

        let mut removed = 0;
        for prefix in record.affected_prefixes() {
            removed += self.executor.invalidate_by_prefix(prefix);
        }
        debug!(
            prefixes = record.affected_prefixes().len(),
            removed,
            "Mutation committed, cache invalidated"
        );

        Ok(value)
    }

    pub async fn mutate_prefixes<T, E, F, Fut>(
        &self,
        write: F,
        prefixes: &[&str],
    ) -> Result<T, QueryError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let record: MutationRecord = prefixes.iter().copied().collect();
        self.mutate(write, &record).await
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }
}
