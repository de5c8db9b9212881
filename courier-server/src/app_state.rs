use std::{fmt, sync::Arc};

use shared::config::server::Config;

use crate::{realtime::hub::DeliveryHub, services::delivery::DeliveryRouter, store::Store};

/// Shared by every route and WebSocket session.
#[derive(Clone)]
pub struct AppState {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) router: DeliveryRouter,
    pub(crate) config: Arc<Config>,
}

impl AppState {
    /// Builds a fresh hub and router over `store`.
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        let hub = Arc::new(DeliveryHub::new());
        let router = DeliveryRouter::new(store.clone(), hub, config.delivery.poll_batch_limit);
        Self {
            store,
            router,
            config,
        }
    }

    pub(crate) fn hub(&self) -> &DeliveryHub {
        self.router.hub()
    }
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState")
            .field("router", &self.router)
            .finish_non_exhaustive()
    }
}
