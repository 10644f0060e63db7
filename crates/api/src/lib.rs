//! HTTP surface of the reservation saga.
//!
//! Exposes the synchronous Reserve step, a push endpoint through which the
//! bus delivers events to the step handlers, the transit inventory contract,
//! dead-letter inspection, and health and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use ledger::{InMemoryLedger, Ledger};
use metrics_exporter_prometheus::PrometheusHandle;
use saga::{
    Choreography, InMemoryBus, InMemoryInventoryGateway, InventoryGateway, PaymentGateway,
    SagaServices, ScriptedPaymentGateway,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState {
    pub choreography: Arc<Choreography>,
    pub bus: InMemoryBus,
}

impl AppState {
    /// Wires the saga participants to the given backends.
    pub fn new(
        ledger: Arc<dyn Ledger>,
        bus: InMemoryBus,
        inventory: Arc<dyn InventoryGateway>,
        payment: Arc<dyn PaymentGateway>,
    ) -> Self {
        let services = SagaServices::new(ledger, Arc::new(bus.clone()), inventory, payment);
        Self {
            choreography: Arc::new(Choreography::new(services)),
            bus,
        }
    }

    pub fn services(&self) -> &SagaServices {
        self.choreography.services()
    }
}

/// Handles to the in-memory backends behind [`create_default_state`].
#[derive(Clone, Default)]
pub struct InMemoryBackends {
    pub ledger: InMemoryLedger,
    pub bus: InMemoryBus,
    pub inventory: InMemoryInventoryGateway,
    pub payment: ScriptedPaymentGateway,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/reservations", post(routes::reservations::create))
        .route("/reservations/{id}", get(routes::reservations::get))
        .route("/events/{topic}", post(routes::events::push))
        .route(
            "/transits",
            get(routes::transits::list).put(routes::transits::put),
        )
        .route("/dead-letters", get(routes::dead_letters::list))
        .route(
            "/dead-letters/resubmit",
            post(routes::dead_letters::resubmit),
        )
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates application state over in-memory backends with a scripted
/// payment gateway, returning the backends for inspection.
pub fn create_default_state() -> (Arc<AppState>, InMemoryBackends) {
    let backends = InMemoryBackends::default();
    let state = AppState::new(
        Arc::new(backends.ledger.clone()),
        backends.bus.clone(),
        Arc::new(backends.inventory.clone()),
        Arc::new(backends.payment.clone()),
    );
    (Arc::new(state), backends)
}
