// src/core/registry.rs
use crate::core::fingerprint::Fingerprint;
use crate::models::error::SError;
use crate::models::remote::{RegistryKind, RemoteFile, RemoteModSummary, SearchFilters};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A remote mod registry backend.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    fn kind(&self) -> RegistryKind;

    async fn search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<RemoteModSummary>, SError>;

    async fn fetch_file_list(&self, remote_mod_id: &str) -> Result<Vec<RemoteFile>, SError>;

    /// Mods owning a file with this content. Backends without a hash lookup return nothing.
    async fn lookup_by_fingerprint(
        &self,
        _fingerprint: &Fingerprint,
    ) -> Result<Vec<RemoteModSummary>, SError> {
        Ok(Vec::new())
    }
}

/// The registry backends available to a collection, at most one per kind.
#[derive(Clone, Default)]
pub struct Registries {
    clients: BTreeMap<RegistryKind, Arc<dyn RegistryClient>>,
}

impl Registries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, client: Arc<dyn RegistryClient>) -> Self {
        self.register(client);
        self
    }

    /// Replaces any backend of the same kind.
    pub fn register(&mut self, client: Arc<dyn RegistryClient>) {
        self.clients.insert(client.kind(), client);
    }

    pub fn get(&self, kind: RegistryKind) -> Option<Arc<dyn RegistryClient>> {
        self.clients.get(&kind).cloned()
    }

    pub fn require(&self, kind: RegistryKind) -> Result<Arc<dyn RegistryClient>, SError> {
        self.get(kind)
            .ok_or_else(|| SError::NetworkError(format!("no {kind} client configured")))
    }

    pub fn kinds(&self) -> impl Iterator<Item = RegistryKind> + '_ {
        self.clients.keys().copied()
    }
}
