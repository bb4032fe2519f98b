//! Stockroom
//!
//! Multi-branch inventory core: a reservation-backed stock ledger, the inter-branch
//! stock-transfer workflow and the purchase-order receiving workflow.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod migrator;
pub mod services;

use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use validator::Validate;

use crate::errors::ServiceError;
use crate::events::{EventHandler, EventSender, LoggingEventHandler};
use crate::services::{InventoryLedger, PurchaseOrderService, StockTransferService};

/// Everything a caller needs to drive the workflows against one database.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<db::DbPool>,
    pub config: config::AppConfig,
    pub event_sender: EventSender,
    pub ledger: InventoryLedger,
    pub transfers: StockTransferService,
    pub purchase_orders: PurchaseOrderService,
}

impl AppState {
    /// Wires the services around an existing pool and event sender.
    pub fn new(db: Arc<db::DbPool>, config: config::AppConfig, event_sender: EventSender) -> Self {
        let sender = Some(event_sender.clone());
        Self {
            ledger: InventoryLedger::new(db.clone(), sender.clone()),
            transfers: StockTransferService::new(db.clone(), sender.clone()),
            purchase_orders: PurchaseOrderService::new(db.clone(), sender),
            db,
            config,
            event_sender,
        }
    }

    /// Connects, migrates when `auto_migrate` is set and starts the event loop.
    ///
    /// The returned handle finishes once every clone of the event sender is dropped.
    pub async fn build(config: config::AppConfig) -> Result<(Self, JoinHandle<()>), ServiceError> {
        config.validate()?;

        let pool = db::establish_connection_from_app_config(&config).await?;
        if config.auto_migrate {
            db::run_migrations(&pool).await?;
        }

        let (event_sender, event_rx) = EventSender::channel(config.event_channel_capacity);
        let handlers: Vec<Arc<dyn EventHandler>> = vec![Arc::new(LoggingEventHandler)];
        let event_loop = tokio::spawn(events::process_events(event_rx, handlers));

        info!(environment = %config.environment, "Stockroom initialised");
        Ok((Self::new(Arc::new(pool), config, event_sender), event_loop))
    }
}
