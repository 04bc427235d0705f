//! Store resolution for scripts, including the request-scoped store.

use super::{create_store_factory, InMemoryStoreFactory, PrefixedKeyStore, Store, StoreFactory};
use crate::config::{EngineConfig, PluginConfig, StoreConfig};
use crate::error::StoreError;
use crate::hooks::{EngineLifecycleListener, RouteSummary};
use crate::script::{AdditionalBindings, ExecutionContext, ScriptBinding};
use std::sync::Arc;

/// Reserved store name scoped to a single request.
pub const REQUEST_STORE_NAME: &str = "request";

/// Binding name under which scripts see their stores.
pub const STORES_BINDING: &str = "stores";

/// Resolves store names against the configured backend, or against a
/// process-local in-memory factory when asked to.
#[derive(Clone)]
pub struct StoreService {
    backend: Arc<dyn StoreFactory>,
    local: Arc<InMemoryStoreFactory>,
}

impl StoreService {
    pub fn new(backend: Arc<dyn StoreFactory>) -> Self {
        Self {
            backend,
            local: Arc::new(InMemoryStoreFactory::new(None)),
        }
    }

    /// Build the service for a store config, connecting remote backends now.
    pub fn from_config(config: &StoreConfig) -> Result<Self, StoreError> {
        Ok(Self::new(create_store_factory(config)?))
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryStoreFactory::new(None)))
    }

    fn factory(&self, force_in_memory: bool) -> &dyn StoreFactory {
        if force_in_memory {
            self.local.as_ref()
        } else {
            self.backend.as_ref()
        }
    }

    /// Resolve a store by name. The reserved request store only exists
    /// inside a request, see [`StoreService::request_scope`].
    pub fn get_store_by_name(
        &self,
        name: &str,
        force_in_memory: bool,
    ) -> Result<Arc<dyn Store>, StoreError> {
        if name == REQUEST_STORE_NAME {
            return Err(StoreError::OutsideRequestScope);
        }
        self.factory(force_in_memory).get_store_by_name(name)
    }

    pub fn has_store_with_name(&self, name: &str, force_in_memory: bool) -> bool {
        self.factory(force_in_memory).has_store_with_name(name)
    }

    pub fn delete_store_by_name(&self, name: &str, force_in_memory: bool) -> Result<(), StoreError> {
        self.factory(force_in_memory).delete_store_by_name(name)
    }

    pub fn backend_description(&self) -> &'static str {
        self.backend.type_description()
    }

    /// Store view for one request. The request store is released when the
    /// returned value is dropped.
    pub fn request_scope(&self, request_id: u64) -> RequestStores {
        RequestStores {
            service: self.clone(),
            request_store_name: format!("{REQUEST_STORE_NAME}_{request_id}"),
        }
    }
}

/// The stores visible to one request.
///
/// `request` resolves to a per-request in-memory store named
/// `request_<id>`; every other name goes through the [`StoreService`].
pub struct RequestStores {
    service: StoreService,
    request_store_name: String,
}

impl RequestStores {
    pub fn request_store_name(&self) -> &str {
        &self.request_store_name
    }

    pub fn get_store_by_name(
        &self,
        name: &str,
        force_in_memory: bool,
    ) -> Result<Arc<dyn Store>, StoreError> {
        if name == REQUEST_STORE_NAME {
            return self
                .service
                .local
                .get_store_by_name(&self.request_store_name);
        }
        self.service.get_store_by_name(name, force_in_memory)
    }

    /// Store whose keys are namespaced with `namespace:`.
    pub fn get_namespaced_store(
        &self,
        name: &str,
        namespace: &str,
    ) -> Result<Arc<dyn Store>, StoreError> {
        let inner = self.get_store_by_name(name, false)?;
        Ok(Arc::new(PrefixedKeyStore::new(inner, format!("{namespace}:"))))
    }

    pub fn has_store_with_name(&self, name: &str, force_in_memory: bool) -> bool {
        if name == REQUEST_STORE_NAME {
            return self
                .service
                .local
                .has_store_with_name(&self.request_store_name);
        }
        self.service.has_store_with_name(name, force_in_memory)
    }

    pub fn delete_store_by_name(&self, name: &str, force_in_memory: bool) -> Result<(), StoreError> {
        if name == REQUEST_STORE_NAME {
            return self
                .service
                .local
                .delete_store_by_name(&self.request_store_name);
        }
        self.service.delete_store_by_name(name, force_in_memory)
    }
}

impl Drop for RequestStores {
    fn drop(&mut self) {
        if let Err(e) = self
            .service
            .local
            .delete_store_by_name(&self.request_store_name)
        {
            tracing::warn!(
                "Failed to release request store {}: {}",
                self.request_store_name,
                e
            );
        }
    }
}

/// Injects a `stores` binding into every script execution.
pub struct StoreLifecycleListener {
    service: StoreService,
}

impl StoreLifecycleListener {
    pub fn new(service: StoreService) -> Self {
        Self { service }
    }
}

impl EngineLifecycleListener for StoreLifecycleListener {
    fn name(&self) -> &str {
        "stores"
    }

    fn after_routes_configured(
        &self,
        _config: &EngineConfig,
        _plugins: &[PluginConfig],
        routes: &[RouteSummary],
    ) {
        let scripted = routes.iter().filter(|r| r.script_file.is_some()).count();
        tracing::info!(
            "Store backend {} available to {} scripted route(s)",
            self.service.backend_description(),
            scripted
        );
    }

    fn before_building_runtime_context(
        &self,
        bindings: &mut AdditionalBindings,
        context: &ExecutionContext<'_>,
    ) {
        let stores = self.service.request_scope(context.request_id);
        tracing::trace!(
            "Binding stores for request {} ({})",
            context.request_id,
            stores.request_store_name()
        );
        bindings.insert(STORES_BINDING, ScriptBinding::Stores(Arc::new(stores)));
    }
}
