//! Type registry: resolves event-type names to storage handles.
//!
//! Resolution checks an in-process cache first. On a miss the backend is
//! asked for the type's collections; if they are absent they are created
//! and fetched once more. A concurrent creator that loses the race sees
//! [`StorageError::AlreadyExists`], which counts as success. Only
//! successful resolutions are cached, so a failed type is retried on its
//! next use.

use std::collections::BTreeMap;

use cube_storage::{StorageBackend, StorageError, TypeCollection};
use cube_types::TypeName;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// The resolved handle pair for backend `B`.
pub type Collection<B> =
    TypeCollection<<B as StorageBackend>::Events, <B as StorageBackend>::Metrics>;

/// Errors from resolving a type's storage.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    /// The type has no collections and the caller asked not to create them.
    #[error("unknown event type: {name}")]
    Absent {
        /// The type name.
        name: TypeName,
    },

    /// Creating the type's collections failed.
    #[error("failed to create collections for {name}: {source}")]
    Create {
        /// The type name.
        name: TypeName,
        /// The underlying storage error.
        source: StorageError,
    },

    /// Fetching the type's collections failed after one retry.
    #[error("failed to fetch collections for {name}: {source}")]
    Fetch {
        /// The type name.
        name: TypeName,
        /// The underlying storage error.
        source: StorageError,
    },
}

/// Cache of resolved types over a [`StorageBackend`].
pub struct Registry<B: StorageBackend> {
    backend: B,
    known: RwLock<BTreeMap<TypeName, Collection<B>>>,
}

impl<B: StorageBackend> Registry<B> {
    /// Create an empty registry.
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            known: RwLock::new(BTreeMap::new()),
        }
    }

    /// The underlying backend.
    pub const fn backend(&self) -> &B {
        &self.backend
    }

    /// Resolve `name`, creating its collections if needed.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Create`] if creation fails for a reason
    /// other than a concurrent creator, or [`ProvisionError::Fetch`] if the
    /// collections still cannot be fetched afterwards.
    pub async fn resolve(&self, name: &TypeName) -> Result<Collection<B>, ProvisionError> {
        if let Some(hit) = self.cached(name).await {
            return Ok(hit);
        }

        let collection = match self.backend.fetch(name).await {
            Ok(collection) => collection,
            Err(e) => {
                if e.is_absent() {
                    self.provision(name).await?;
                } else {
                    warn!(event_type = %name, error = %e, "Fetching collections failed, retrying");
                }
                self.backend
                    .fetch(name)
                    .await
                    .map_err(|source| ProvisionError::Fetch {
                        name: name.clone(),
                        source,
                    })?
            }
        };

        Ok(self.remember(name, collection).await)
    }

    /// Resolve `name` without creating anything.
    ///
    /// # Errors
    ///
    /// Returns [`ProvisionError::Absent`] if the type has no collections,
    /// or [`ProvisionError::Fetch`] if the lookup fails.
    pub async fn lookup(&self, name: &TypeName) -> Result<Collection<B>, ProvisionError> {
        if let Some(hit) = self.cached(name).await {
            return Ok(hit);
        }
        match self.backend.fetch(name).await {
            Ok(collection) => Ok(self.remember(name, collection).await),
            Err(e) if e.is_absent() => Err(ProvisionError::Absent { name: name.clone() }),
            Err(source) => Err(ProvisionError::Fetch {
                name: name.clone(),
                source,
            }),
        }
    }

    /// Names of every type resolved so far.
    pub async fn known_types(&self) -> Vec<TypeName> {
        self.known.read().await.keys().cloned().collect()
    }

    async fn cached(&self, name: &TypeName) -> Option<Collection<B>> {
        self.known.read().await.get(name).cloned()
    }

    async fn provision(&self, name: &TypeName) -> Result<(), ProvisionError> {
        match self.backend.create(name).await {
            Ok(()) => {
                info!(event_type = %name, "Provisioned event type");
                Ok(())
            }
            Err(e) if e.is_already_exists() => {
                debug!(event_type = %name, "Lost provisioning race, re-fetching");
                Ok(())
            }
            Err(source) => Err(ProvisionError::Create {
                name: name.clone(),
                source,
            }),
        }
    }

    /// Cache `collection` unless a concurrent resolver already did; either
    /// way return the cached handles.
    async fn remember(&self, name: &TypeName, collection: Collection<B>) -> Collection<B> {
        self.known
            .write()
            .await
            .entry(name.clone())
            .or_insert(collection)
            .clone()
    }
}
