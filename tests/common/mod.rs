#![allow(dead_code)]

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, EntityTrait};
use stockroom::{
    config::AppConfig,
    db,
    entities::{branch, product_variant},
    events::{Event, EventSender, StockAction},
    services::purchase_orders::{
        CreatePurchaseOrderItem, CreatePurchaseOrderRequest, PurchaseOrderDetails,
    },
    AppState,
};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Application state over a fresh in-memory SQLite database.
///
/// The pool holds a single connection: every in-memory connection is its own database.
pub struct TestContext {
    pub state: AppState,
    events: mpsc::Receiver<Event>,
}

impl TestContext {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations");

        let (sender, events) = EventSender::channel(512);
        Self {
            state: AppState::new(Arc::new(pool), cfg, sender),
            events,
        }
    }

    pub async fn seed_branch(&self, code: &str) -> branch::Model {
        self.insert_branch(code, true).await
    }

    pub async fn seed_inactive_branch(&self, code: &str) -> branch::Model {
        self.insert_branch(code, false).await
    }

    async fn insert_branch(&self, code: &str, is_active: bool) -> branch::Model {
        let now = Utc::now();
        branch::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(format!("Branch {code}")),
            code: Set(code.to_string()),
            is_active: Set(is_active),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed branch")
    }

    /// A leaf variant with `quantity` on hand and nothing reserved.
    pub async fn seed_variant(
        &self,
        branch_id: Uuid,
        product_id: Uuid,
        sku: &str,
        quantity: i32,
    ) -> product_variant::Model {
        self.insert_variant(VariantSeed {
            branch_id,
            product_id,
            sku: sku.to_string(),
            quantity,
            ..VariantSeed::default()
        })
        .await
    }

    /// A child of `parent`, created `age_secs` seconds after the parent.
    pub async fn seed_child(
        &self,
        parent: &product_variant::Model,
        sku: &str,
        quantity: i32,
        age_secs: i64,
    ) -> product_variant::Model {
        self.insert_variant(VariantSeed {
            branch_id: parent.branch_id,
            product_id: parent.product_id,
            parent_variant_id: Some(parent.id),
            sku: sku.to_string(),
            quantity,
            created_offset_secs: age_secs,
            ..VariantSeed::default()
        })
        .await
    }

    pub async fn insert_variant(&self, seed: VariantSeed) -> product_variant::Model {
        let created_at = Utc::now() + Duration::seconds(seed.created_offset_secs);
        product_variant::ActiveModel {
            id: Set(Uuid::new_v4()),
            product_id: Set(seed.product_id),
            branch_id: Set(seed.branch_id),
            parent_variant_id: Set(seed.parent_variant_id),
            sku: Set(seed.sku.clone()),
            name: Set(format!("Variant {}", seed.sku)),
            quantity: Set(seed.quantity),
            reserved_quantity: Set(seed.reserved),
            cost_price: Set(dec!(80.00)),
            selling_price: Set(seed.selling_price),
            is_active: Set(seed.is_active),
            deleted_at: Set(seed.deleted.then(Utc::now)),
            created_at: Set(created_at),
            updated_at: Set(created_at),
        }
        .insert(&*self.state.db)
        .await
        .expect("failed to seed variant")
    }

    pub async fn variant(&self, variant_id: Uuid) -> product_variant::Model {
        product_variant::Entity::find_by_id(variant_id)
            .one(&*self.state.db)
            .await
            .expect("failed to load variant")
            .expect("variant missing")
    }

    /// A draft purchase order into `branch_id` with one line per `(variant, quantity)`.
    pub async fn create_po(
        &self,
        branch_id: Uuid,
        lines: &[(&product_variant::Model, i32)],
    ) -> PurchaseOrderDetails {
        self.state
            .purchase_orders
            .create_purchase_order(CreatePurchaseOrderRequest {
                order_number: format!("PO-{}", &Uuid::new_v4().simple().to_string()[..8]),
                supplier_id: Uuid::new_v4(),
                branch_id,
                created_by: "buyer".to_string(),
                notes: None,
                items: lines
                    .iter()
                    .map(|(variant, quantity)| CreatePurchaseOrderItem {
                        product_id: variant.product_id,
                        variant_id: variant.id,
                        quantity_ordered: *quantity,
                        unit_cost: dec!(95.50),
                    })
                    .collect(),
            })
            .await
            .expect("failed to create purchase order")
    }

    /// Everything published so far.
    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

pub fn stock_actions(events: &[Event]) -> Vec<StockAction> {
    events
        .iter()
        .filter_map(|event| match event {
            Event::StockUpdated(update) => Some(update.action),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct VariantSeed {
    pub branch_id: Uuid,
    pub product_id: Uuid,
    pub parent_variant_id: Option<Uuid>,
    pub sku: String,
    pub quantity: i32,
    pub reserved: i32,
    pub selling_price: Decimal,
    pub is_active: bool,
    pub deleted: bool,
    pub created_offset_secs: i64,
}

impl Default for VariantSeed {
    fn default() -> Self {
        Self {
            branch_id: Uuid::nil(),
            product_id: Uuid::new_v4(),
            parent_variant_id: None,
            sku: "SKU-DEFAULT".to_string(),
            quantity: 0,
            reserved: 0,
            selling_price: dec!(129.50),
            is_active: true,
            deleted: false,
            created_offset_secs: 0,
        }
    }
}
