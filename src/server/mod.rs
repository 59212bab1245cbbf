//! HTTP and WebSocket front end for one servo bus.
//!
//! The bus lives behind a single mutex and every operation on it runs on
//! a blocking worker while holding that lock, so requests never interleave
//! traffic on the wire. A sweep keeps the lock for its whole duration.

use std::{
    io,
    sync::{Arc, Mutex},
};

use axum::{Router, routing::get, routing::post};
use log::{info, warn};

use crate::session::{PortOpener, SerialOpener, ServoBus};

mod config;
mod notifier;
mod routes;

pub use config::{ConfigError, ServiceConfig};
pub use notifier::{BusEvent, Notifier};
pub use routes::ApiError;

pub struct AppState<O: PortOpener> {
    bus: Arc<Mutex<ServoBus<O>>>,
    opener: O,
    pub notifier: Notifier,
    pub config: Arc<ServiceConfig>,
}

impl<O: PortOpener> Clone for AppState<O> {
    fn clone(&self) -> Self {
        Self {
            bus: Arc::clone(&self.bus),
            opener: self.opener.clone(),
            notifier: self.notifier.clone(),
            config: Arc::clone(&self.config),
        }
    }
}

impl<O: PortOpener> AppState<O> {
    pub fn new(opener: O, config: ServiceConfig) -> Self {
        Self {
            bus: Arc::new(Mutex::new(ServoBus::new(opener.clone()))),
            opener,
            notifier: Notifier::default(),
            config: Arc::new(config),
        }
    }

    /// Lists serial devices on a blocking worker without touching the bus.
    pub(crate) async fn list_ports(&self) -> Result<Vec<String>, ApiError> {
        let opener = self.opener.clone();
        let ports = tokio::task::spawn_blocking(move || opener.available_ports())
            .await
            .map_err(|e| ApiError::Worker(e.to_string()))??;
        Ok(ports)
    }

    /// Runs `f` on a blocking worker with exclusive access to the bus.
    pub(crate) async fn with_bus<T, F>(&self, f: F) -> Result<T, ApiError>
    where
        F: FnOnce(&mut ServoBus<O>, &Notifier) -> T + Send + 'static,
        T: Send + 'static,
    {
        let bus = Arc::clone(&self.bus);
        let notifier = self.notifier.clone();
        tokio::task::spawn_blocking(move || -> Result<T, ApiError> {
            let mut bus = bus.lock().map_err(|_| ApiError::Poisoned)?;
            Ok(f(&mut *bus, &notifier))
        })
        .await
        .map_err(|e| ApiError::Worker(e.to_string()))?
    }
}

pub fn build_router<O: PortOpener>(state: AppState<O>) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/scan_ports", get(routes::scan_ports::<O>))
        .route("/connect_port", post(routes::connect_port::<O>))
        .route("/get_servo_info", get(routes::get_servo_info::<O>))
        .route("/change_servo_id", post(routes::change_servo_id::<O>))
        .route("/move_servo", post(routes::move_servo::<O>))
        .route("/servo_status/:id", get(routes::servo_status::<O>))
        .route("/events", get(routes::events::<O>))
        .with_state(state)
}

/// Serves the bus manager on `config.bind` until Ctrl+C.
pub async fn run(config: ServiceConfig) -> io::Result<()> {
    let opener = SerialOpener {
        timeout: config.timeout(),
    };
    let bind = config.bind;
    let app = build_router(AppState::new(opener, config));

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!("bus manager listening on {}", bind);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
