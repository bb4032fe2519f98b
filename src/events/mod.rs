use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::entities::{PurchaseOrderStatus, TransferStatus};
use crate::errors::ServiceError;

/// Topic every ledger-affecting event is published under.
pub const STOCK_UPDATED_TOPIC: &str = "stock.updated";

/// What changed the stock of a variant.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StockAction {
    Reserved,
    Released,
    TransferCreated,
    TransferRejected,
    TransferCancelled,
    TransferCompleted,
    PoReceived,
}

/// Cache-invalidation signal for one variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockUpdate {
    pub action: StockAction,
    pub variant_id: Uuid,
    pub quantity: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_order_id: Option<Uuid>,
    pub occurred_at: DateTime<Utc>,
}

impl StockUpdate {
    pub fn new(action: StockAction, variant_id: Uuid, quantity: i32) -> Self {
        Self {
            action,
            variant_id,
            quantity,
            branch_id: None,
            transfer_id: None,
            purchase_order_id: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn at_branch(mut self, branch_id: Uuid) -> Self {
        self.branch_id = Some(branch_id);
        self
    }

    pub fn for_transfer(mut self, transfer_id: Uuid) -> Self {
        self.transfer_id = Some(transfer_id);
        self
    }

    pub fn for_purchase_order(mut self, purchase_order_id: Uuid) -> Self {
        self.purchase_order_id = Some(purchase_order_id);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    StockUpdated(StockUpdate),
    TransferStatusChanged {
        transfer_id: Uuid,
        old_status: TransferStatus,
        new_status: TransferStatus,
    },
    PurchaseOrderStatusChanged {
        purchase_order_id: Uuid,
        old_status: PurchaseOrderStatus,
        new_status: PurchaseOrderStatus,
    },
}

impl Event {
    pub fn topic(&self) -> &'static str {
        match self {
            Event::StockUpdated(_) => STOCK_UPDATED_TOPIC,
            Event::TransferStatusChanged { .. } => "transfer.status_changed",
            Event::PurchaseOrderStatusChanged { .. } => "purchase_order.status_changed",
        }
    }
}

impl From<StockUpdate> for Event {
    fn from(update: StockUpdate) -> Self {
        Event::StockUpdated(update)
    }
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving half of a bounded channel.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event, waiting for channel capacity.
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Publishes without waiting. A full or closed channel drops the event and logs it.
    pub fn send_or_log(&self, event: impl Into<Event>) {
        let event = event.into();
        let topic = event.topic();
        match self.sender.try_send(event) {
            Ok(()) => debug!(topic, "Event published"),
            Err(TrySendError::Full(event)) => {
                warn!(topic, ?event, "Event channel full; dropping event")
            }
            Err(TrySendError::Closed(event)) => {
                warn!(topic, ?event, "Event channel closed; dropping event")
            }
        }
    }
}

/// Subscriber seam for dashboards and read models.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: Event) -> Result<(), String>;
}

/// Logs every event it sees.
#[derive(Debug, Default, Clone)]
pub struct LoggingEventHandler;

#[async_trait]
impl EventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: Event) -> Result<(), String> {
        match &event {
            Event::StockUpdated(update) => info!(
                topic = event.topic(),
                action = %update.action,
                variant_id = %update.variant_id,
                quantity = update.quantity,
                "Stock updated"
            ),
            Event::TransferStatusChanged {
                transfer_id,
                old_status,
                new_status,
            } => info!(
                topic = event.topic(),
                transfer_id = %transfer_id,
                old_status = %old_status,
                new_status = %new_status,
                "Transfer status changed"
            ),
            Event::PurchaseOrderStatusChanged {
                purchase_order_id,
                old_status,
                new_status,
            } => info!(
                topic = event.topic(),
                purchase_order_id = %purchase_order_id,
                old_status = %old_status,
                new_status = %new_status,
                "Purchase order status changed"
            ),
        }
        Ok(())
    }
}

/// Receives events and fans each one out to every handler until all senders are dropped.
pub async fn process_events(mut rx: mpsc::Receiver<Event>, handlers: Vec<Arc<dyn EventHandler>>) {
    info!(handlers = handlers.len(), "Starting event processing loop");

    while let Some(event) = rx.recv().await {
        let topic = event.topic();
        let results = join_all(
            handlers
                .iter()
                .map(|handler| handler.handle_event(event.clone())),
        )
        .await;

        for err in results.into_iter().filter_map(Result::err) {
            error!(topic, error = %err, "Event handler failed");
        }
    }

    warn!("Event processing loop has ended");
}
