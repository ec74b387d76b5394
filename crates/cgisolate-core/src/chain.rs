//! Ordered chain of the enabled resource handlers

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::IsolationConfig;
use crate::handlers::{ContainerId, HandlerKind, ResourceHandler};
use crate::privileged::PrivilegedOperation;
use crate::registry::HandlerRegistry;
use crate::Result;

/// Immutable sequence of handlers, applied bandwidth first then disk
#[derive(Debug)]
pub struct ResourceHandlerChain {
    handlers: Vec<Arc<dyn ResourceHandler>>,
}

impl ResourceHandlerChain {
    pub fn new(handlers: Vec<Arc<dyn ResourceHandler>>) -> Self {
        Self { handlers }
    }

    pub fn handlers(&self) -> &[Arc<dyn ResourceHandler>] {
        &self.handlers
    }

    pub fn kinds(&self) -> Vec<HandlerKind> {
        self.handlers.iter().map(|h| h.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run a hook on every handler in order, stopping at the first error
    fn run_hook<F>(&self, mut hook: F) -> Result<Vec<PrivilegedOperation>>
    where
        F: FnMut(&dyn ResourceHandler) -> Result<Vec<PrivilegedOperation>>,
    {
        let mut ops = Vec::new();
        for handler in &self.handlers {
            ops.extend(hook(handler.as_ref())?);
        }
        Ok(ops)
    }
}

impl ResourceHandler for ResourceHandlerChain {
    fn kind(&self) -> HandlerKind {
        HandlerKind::Chain
    }

    fn bootstrap(&self, config: &IsolationConfig) -> Result<Vec<PrivilegedOperation>> {
        self.run_hook(|h| h.bootstrap(config))
    }

    fn pre_start(&self, container: &ContainerId) -> Result<Vec<PrivilegedOperation>> {
        self.run_hook(|h| h.pre_start(container))
    }

    fn reacquire(&self, container: &ContainerId) -> Result<Vec<PrivilegedOperation>> {
        self.run_hook(|h| h.reacquire(container))
    }

    fn post_complete(&self, container: &ContainerId) -> Result<Vec<PrivilegedOperation>> {
        self.run_hook(|h| h.post_complete(container))
    }

    fn teardown(&self) -> Result<Vec<PrivilegedOperation>> {
        self.run_hook(|h| h.teardown())
    }
}

/// Assembles and caches the configured [`ResourceHandlerChain`]
#[derive(Debug)]
pub struct ChainBuilder {
    registry: Arc<HandlerRegistry>,
    chain: RwLock<Arc<OnceCell<Arc<ResourceHandlerChain>>>>,
}

impl ChainBuilder {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            chain: RwLock::new(Arc::new(OnceCell::new())),
        }
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    /// Configured chain, or `None` when no resource isolation is enabled.
    ///
    /// Assembled once; later calls get the cached chain regardless of `config`.
    pub fn chain(&self, config: &IsolationConfig) -> Result<Option<Arc<ResourceHandlerChain>>> {
        let cell = Arc::clone(&*self.chain.read());
        let chain = cell.get_or_try_init(|| self.build_chain(config).map(Arc::new))?;

        if chain.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Arc::clone(chain)))
        }
    }

    /// Drop the cached chain so the next [`Self::chain`] call assembles it again.
    ///
    /// Handlers already built by the registry are kept. Meant for tests.
    pub fn reset_for_testing(&self) {
        *self.chain.write() = Arc::new(OnceCell::new());
        debug!("Resource handler chain reset");
    }

    fn build_chain(&self, config: &IsolationConfig) -> Result<ResourceHandlerChain> {
        let handlers: Vec<Arc<dyn ResourceHandler>> = [
            self.registry.outbound_bandwidth_handler(config)?,
            self.registry.disk_handler(config)?,
        ]
        .into_iter()
        .flatten()
        .collect();

        let chain = ResourceHandlerChain::new(handlers);
        info!("Resource handler chain assembled: {:?}", chain.kinds());
        Ok(chain)
    }
}
