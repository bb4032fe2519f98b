use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        branch::Entity as BranchEntity,
        inventory_item::{self, Entity as InventoryItemEntity},
        purchase_order::{self, Entity as PurchaseOrderEntity},
        purchase_order_item::{self, Entity as PurchaseOrderItemEntity},
        InventoryItemStatus, PurchaseOrderAction, PurchaseOrderStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender, StockAction, StockUpdate},
    services::inventory_ledger,
};

/// Rows per multi-row `INSERT` and values per `IN (...)` list, well under the bind-parameter
/// limits of SQLite and PostgreSQL.
const BATCH_CHUNK_SIZE: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePurchaseOrderRequest {
    #[validate(length(min = 1, max = 64))]
    pub order_number: String,
    pub supplier_id: Uuid,
    pub branch_id: Uuid,
    #[validate(length(min = 1, max = 100))]
    pub created_by: String,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
    #[validate(length(min = 1, message = "A purchase order needs at least one line item"))]
    pub items: Vec<CreatePurchaseOrderItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreatePurchaseOrderItem {
    pub product_id: Uuid,
    pub variant_id: Uuid,
    #[validate(range(min = 1, message = "Ordered quantity must be greater than zero"))]
    pub quantity_ordered: i32,
    pub unit_cost: Decimal,
}

/// Serial number of one received unit, with its IMEI when the unit has one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitIdentifier {
    pub serial_number: String,
    #[serde(default)]
    pub imei: Option<String>,
}

impl UnitIdentifier {
    pub fn serial(serial_number: impl Into<String>) -> Self {
        Self {
            serial_number: serial_number.into(),
            imei: None,
        }
    }

    fn values(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.serial_number.as_str())
            .chain(self.imei.as_deref())
            .map(str::trim)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveLine {
    pub line_item_id: Uuid,
    pub quantity: i32,
    /// Empty, or exactly one identifier per unit.
    #[serde(default)]
    pub identifiers: Vec<UnitIdentifier>,
    #[serde(default)]
    pub location: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiveBatchRequest {
    pub received_by: String,
    pub lines: Vec<ReceiveLine>,
}

impl ReceiveBatchRequest {
    /// Shape checks that need no database access.
    fn check(&self) -> Result<(), ServiceError> {
        if self.received_by.trim().is_empty() {
            return Err(ServiceError::ValidationError(
                "Receiver is required".to_string(),
            ));
        }
        if self.lines.is_empty() {
            return Err(ServiceError::ValidationError(
                "Receive batch has no lines".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for line in &self.lines {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Received quantity for line {} must be greater than zero",
                    line.line_item_id
                )));
            }
            if !line.identifiers.is_empty() && line.identifiers.len() != line.quantity as usize {
                return Err(ServiceError::ValidationError(format!(
                    "Line {} receives {} units but supplies {} identifiers",
                    line.line_item_id,
                    line.quantity,
                    line.identifiers.len()
                )));
            }
            for value in line.identifiers.iter().flat_map(UnitIdentifier::values) {
                if value.is_empty() {
                    return Err(ServiceError::ValidationError(
                        "Serial numbers and IMEIs must not be empty".to_string(),
                    ));
                }
                if !seen.insert(value) {
                    return Err(ServiceError::DuplicateIdentifier(value.to_string()));
                }
            }
        }
        Ok(())
    }

    /// Units per line item, with repeated lines summed. Widened so no caller input can overflow.
    fn totals(&self) -> BTreeMap<Uuid, i64> {
        let mut totals = BTreeMap::new();
        for line in &self.lines {
            *totals.entry(line.line_item_id).or_insert(0) += i64::from(line.quantity);
        }
        totals
    }

    fn identifier_values(&self) -> Vec<String> {
        self.lines
            .iter()
            .flat_map(|line| line.identifiers.iter())
            .flat_map(UnitIdentifier::values)
            .map(str::to_string)
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseOrderDetails {
    pub order: purchase_order::Model,
    pub items: Vec<purchase_order_item::Model>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineProgress {
    pub line_item_id: Uuid,
    pub variant_id: Uuid,
    pub ordered: i32,
    pub received: i32,
    pub remaining: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiveSummary {
    pub purchase_order_id: Uuid,
    pub status: PurchaseOrderStatus,
    pub total_items: usize,
    pub completed_items: usize,
    pub total_ordered: i64,
    pub total_received: i64,
    pub can_complete: bool,
    pub completion_percentage: f64,
    pub lines: Vec<LineProgress>,
}

impl ReceiveSummary {
    fn new(order: &purchase_order::Model, items: &[purchase_order_item::Model]) -> Self {
        let total_ordered: i64 = items.iter().map(|i| i64::from(i.quantity_ordered)).sum();
        let total_received: i64 = items.iter().map(|i| i64::from(i.quantity_received)).sum();
        let completion_percentage = if total_ordered > 0 {
            (total_received as f64 / total_ordered as f64 * 10_000.0).round() / 100.0
        } else {
            0.0
        };

        Self {
            purchase_order_id: order.id,
            status: order.status,
            total_items: items.len(),
            completed_items: items.iter().filter(|i| i.is_fully_received()).count(),
            total_ordered,
            total_received,
            can_complete: order.status.next(PurchaseOrderAction::Complete).is_some(),
            completion_percentage,
            lines: items
                .iter()
                .map(|item| LineProgress {
                    line_item_id: item.id,
                    variant_id: item.variant_id,
                    ordered: item.quantity_ordered,
                    received: item.quantity_received,
                    remaining: item.remaining(),
                })
                .collect(),
        }
    }
}

/// "3 units remaining (line a: 2, line b: 1)" for the lines still short.
fn shortfall_detail(items: &[purchase_order_item::Model]) -> Option<String> {
    let short: Vec<_> = items.iter().filter(|i| i.remaining() > 0).collect();
    if short.is_empty() {
        return None;
    }
    let total: i32 = short.iter().map(|i| i.remaining()).sum();
    let lines = short
        .iter()
        .map(|i| format!("line {}: {}", i.id, i.remaining()))
        .collect::<Vec<_>>()
        .join(", ");
    Some(format!("{} units remaining ({})", total, lines))
}

async fn find_order<C: ConnectionTrait>(
    conn: &C,
    po_id: Uuid,
) -> Result<purchase_order::Model, ServiceError> {
    PurchaseOrderEntity::find_by_id(po_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Purchase order {} not found", po_id)))
}

async fn order_items<C: ConnectionTrait>(
    conn: &C,
    po_id: Uuid,
) -> Result<Vec<purchase_order_item::Model>, ServiceError> {
    PurchaseOrderItemEntity::find()
        .filter(purchase_order_item::Column::PurchaseOrderId.eq(po_id))
        .order_by_asc(purchase_order_item::Column::CreatedAt)
        .order_by_asc(purchase_order_item::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// Conditional status write, see `stock_transfers::claim`.
async fn claim<C: ConnectionTrait>(
    conn: &C,
    order: &purchase_order::Model,
    action: PurchaseOrderAction,
    columns: Vec<(purchase_order::Column, SimpleExpr)>,
) -> Result<PurchaseOrderStatus, ServiceError> {
    let next = order.status.transition(action)?;

    let mut update = PurchaseOrderEntity::update_many()
        .col_expr(purchase_order::Column::Status, Expr::value(next))
        .col_expr(purchase_order::Column::UpdatedAt, Expr::value(Utc::now()));
    for (column, value) in columns {
        update = update.col_expr(column, value);
    }

    let result = update
        .filter(purchase_order::Column::Id.eq(order.id))
        .filter(purchase_order::Column::Status.eq(order.status))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        let current = find_order(conn, order.id).await?;
        return Err(ServiceError::invalid_transition(
            "purchase order",
            action.as_str(),
            current.status,
        ));
    }

    Ok(next)
}

/// Purchase order receiving: partial receipts with serial/IMEI capture, one inventory item per
/// received unit, and completion once every line is in.
#[derive(Clone)]
pub struct PurchaseOrderService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl PurchaseOrderService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    fn publish(&self, event: impl Into<Event>) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event);
        }
    }

    /// Creates a draft purchase order with its line items.
    #[instrument(skip(self, request), fields(order_number = %request.order_number))]
    pub async fn create_purchase_order(
        &self,
        request: CreatePurchaseOrderRequest,
    ) -> Result<PurchaseOrderDetails, ServiceError> {
        request.validate()?;
        for item in &request.items {
            item.validate()?;
            if item.unit_cost < Decimal::ZERO {
                return Err(ServiceError::ValidationError(format!(
                    "Unit cost for variant {} must not be negative",
                    item.variant_id
                )));
            }
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        BranchEntity::find_by_id(request.branch_id)
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Branch {} not found", request.branch_id))
            })?;

        let duplicate = PurchaseOrderEntity::find()
            .filter(purchase_order::Column::OrderNumber.eq(request.order_number.clone()))
            .count(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if duplicate > 0 {
            return Err(ServiceError::ValidationError(format!(
                "Order number {} already exists",
                request.order_number
            )));
        }

        for item in &request.items {
            let variant = inventory_ledger::find_variant(&txn, item.variant_id).await?;
            if variant.product_id != item.product_id {
                return Err(ServiceError::ValidationError(format!(
                    "Variant {} does not belong to product {}",
                    item.variant_id, item.product_id
                )));
            }
            if inventory_ledger::is_parent(&txn, variant.id).await? {
                return Err(ServiceError::ValidationError(format!(
                    "Variant {} is a parent; order one of its child variants",
                    variant.id
                )));
            }
        }

        let total_amount: Decimal = request
            .items
            .iter()
            .map(|item| Decimal::from(item.quantity_ordered) * item.unit_cost)
            .sum();

        let now = Utc::now();
        let order = purchase_order::ActiveModel {
            id: Set(Uuid::new_v4()),
            order_number: Set(request.order_number),
            supplier_id: Set(request.supplier_id),
            branch_id: Set(request.branch_id),
            status: Set(PurchaseOrderStatus::Draft),
            total_amount: Set(total_amount),
            notes: Set(request.notes),
            created_by: Set(request.created_by),
            received_date: Set(None),
            completed_at: Set(None),
            completed_by: Set(None),
            completion_notes: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(ServiceError::db_error)?;

        let mut items = Vec::with_capacity(request.items.len());
        for item in request.items {
            let created = purchase_order_item::ActiveModel {
                id: Set(Uuid::new_v4()),
                purchase_order_id: Set(order.id),
                product_id: Set(item.product_id),
                variant_id: Set(item.variant_id),
                quantity_ordered: Set(item.quantity_ordered),
                quantity_received: Set(0),
                unit_cost: Set(item.unit_cost),
                created_at: Set(now),
                updated_at: Set(now),
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?;
            items.push(created);
        }

        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(purchase_order_id = %order.id, items = items.len(), "Purchase order created");
        Ok(PurchaseOrderDetails { order, items })
    }

    #[instrument(skip(self))]
    pub async fn send_purchase_order(
        &self,
        po_id: Uuid,
    ) -> Result<purchase_order::Model, ServiceError> {
        let db = &*self.db;
        let order = find_order(db, po_id).await?;
        let next = claim(db, &order, PurchaseOrderAction::Send, Vec::new()).await?;

        info!(purchase_order_id = %po_id, "Purchase order sent");
        self.publish(Event::PurchaseOrderStatusChanged {
            purchase_order_id: po_id,
            old_status: order.status,
            new_status: next,
        });
        find_order(db, po_id).await
    }

    /// Cancels a draft or sent order. The reason is kept in `completion_notes`.
    #[instrument(skip(self))]
    pub async fn cancel_purchase_order(
        &self,
        po_id: Uuid,
        reason: Option<String>,
    ) -> Result<purchase_order::Model, ServiceError> {
        let db = &*self.db;
        let order = find_order(db, po_id).await?;
        let next = claim(
            db,
            &order,
            PurchaseOrderAction::Cancel,
            vec![(purchase_order::Column::CompletionNotes, Expr::value(reason))],
        )
        .await?;

        info!(purchase_order_id = %po_id, "Purchase order cancelled");
        self.publish(Event::PurchaseOrderStatusChanged {
            purchase_order_id: po_id,
            old_status: order.status,
            new_status: next,
        });
        find_order(db, po_id).await
    }

    /// Receives one batch, all or nothing.
    ///
    /// Every line is checked against its remaining quantity and every identifier against the
    /// whole inventory before anything is written. On success each unit becomes one inventory
    /// item, on-hand stock rises, and the order status is recomputed over all of its lines.
    #[instrument(skip(self, request), fields(lines = request.lines.len()))]
    pub async fn receive_batch(
        &self,
        po_id: Uuid,
        request: ReceiveBatchRequest,
    ) -> Result<PurchaseOrderDetails, ServiceError> {
        if let Err(err) = request.check() {
            if matches!(err, ServiceError::DuplicateIdentifier(_)) {
                counter!("stockroom.receiving.duplicate_identifiers", 1);
            }
            return Err(err);
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let order = find_order(&txn, po_id).await?;
        if !order.status.accepts_receipts() {
            return Err(ServiceError::invalid_transition(
                "purchase order",
                "receive",
                order.status,
            ));
        }

        let items: HashMap<Uuid, purchase_order_item::Model> = order_items(&txn, po_id)
            .await?
            .into_iter()
            .map(|item| (item.id, item))
            .collect();

        let mut totals = BTreeMap::new();
        for (line_item_id, quantity) in request.totals() {
            let item = items.get(&line_item_id).ok_or_else(|| {
                ServiceError::NotFound(format!(
                    "Line item {} not found on purchase order {}",
                    line_item_id, po_id
                ))
            })?;
            let fits =
                i64::from(item.quantity_received) + quantity <= i64::from(item.quantity_ordered);
            match i32::try_from(quantity) {
                Ok(accepted) if fits => {
                    totals.insert(line_item_id, accepted);
                }
                _ => {
                    counter!("stockroom.receiving.over_receipts", 1);
                    warn!(line_item_id = %item.id, attempted = quantity, "Over-receipt refused");
                    return Err(ServiceError::OverReceipt {
                        line_item_id: item.id,
                        ordered: item.quantity_ordered,
                        received: item.quantity_received,
                        attempted: quantity,
                    });
                }
            }
        }

        let identifiers = request.identifier_values();
        for chunk in identifiers.chunks(BATCH_CHUNK_SIZE) {
            let clash = InventoryItemEntity::find()
                .filter(
                    Condition::any()
                        .add(inventory_item::Column::SerialNumber.is_in(chunk.to_vec()))
                        .add(inventory_item::Column::Imei.is_in(chunk.to_vec())),
                )
                .one(&txn)
                .await
                .map_err(ServiceError::db_error)?;
            if let Some(existing) = clash {
                let value = [existing.serial_number, existing.imei]
                    .into_iter()
                    .flatten()
                    .find(|value| identifiers.contains(value))
                    .unwrap_or_default();
                counter!("stockroom.receiving.duplicate_identifiers", 1);
                warn!(identifier = %value, "Identifier already in inventory");
                return Err(ServiceError::DuplicateIdentifier(value));
            }
        }

        for (line_item_id, quantity) in &totals {
            let result = PurchaseOrderItemEntity::update_many()
                .col_expr(
                    purchase_order_item::Column::QuantityReceived,
                    Expr::col(purchase_order_item::Column::QuantityReceived).add(*quantity),
                )
                .col_expr(
                    purchase_order_item::Column::UpdatedAt,
                    Expr::value(Utc::now()),
                )
                .filter(purchase_order_item::Column::Id.eq(*line_item_id))
                .filter(
                    Expr::expr(
                        Expr::col(purchase_order_item::Column::QuantityReceived).add(*quantity),
                    )
                    .lte(Expr::col(purchase_order_item::Column::QuantityOrdered)),
                )
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;

            if result.rows_affected == 0 {
                let item = &items[line_item_id];
                return Err(ServiceError::OverReceipt {
                    line_item_id: item.id,
                    ordered: item.quantity_ordered,
                    received: item.quantity_received,
                    attempted: i64::from(*quantity),
                });
            }

            inventory_ledger::adjust_on_hand(&txn, items[line_item_id].variant_id, *quantity)
                .await?;
        }

        let now = Utc::now();
        for line in &request.lines {
            let item = &items[&line.line_item_id];
            let variant = inventory_ledger::find_variant(&txn, item.variant_id).await?;

            let units: Vec<_> = (0..line.quantity as usize)
                .map(|unit| {
                    let identifier = line.identifiers.get(unit);
                    inventory_item::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        purchase_order_id: Set(order.id),
                        purchase_order_item_id: Set(item.id),
                        product_id: Set(item.product_id),
                        variant_id: Set(item.variant_id),
                        branch_id: Set(order.branch_id),
                        serial_number: Set(identifier.map(|id| id.serial_number.trim().to_string())),
                        imei: Set(identifier
                            .and_then(|id| id.imei.as_deref())
                            .map(|imei| imei.trim().to_string())),
                        status: Set(InventoryItemStatus::Available),
                        cost_price: Set(item.unit_cost),
                        selling_price: Set(variant.selling_price),
                        location: Set(line.location.clone()),
                        notes: Set(None),
                        received_by: Set(request.received_by.clone()),
                        purchase_date: Set(now),
                        created_at: Set(now),
                        updated_at: Set(now),
                    }
                })
                .collect();

            for chunk in units.chunks(BATCH_CHUNK_SIZE) {
                InventoryItemEntity::insert_many(chunk.to_vec())
                    .exec_without_returning(&txn)
                    .await
                    .map_err(|e| {
                        error!(line_item_id = %item.id, error = %e, "Failed to create inventory items");
                        ServiceError::db_error(e)
                    })?;
            }
        }

        let updated_items = order_items(&txn, po_id).await?;
        let fully_received = updated_items.iter().all(|item| item.is_fully_received());

        let mut columns = Vec::new();
        if order.received_date.is_none() {
            columns.push((purchase_order::Column::ReceivedDate, Expr::value(now)));
        }
        let next = claim(
            &txn,
            &order,
            PurchaseOrderAction::Receive { fully_received },
            columns,
        )
        .await?;

        let updated_order = find_order(&txn, po_id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        let units: i64 = totals.values().map(|quantity| i64::from(*quantity)).sum();
        counter!("stockroom.receiving.batches", 1);
        counter!("stockroom.receiving.units", units as u64);
        info!(
            purchase_order_id = %po_id,
            units,
            status = %next,
            "Receive batch applied"
        );

        for (line_item_id, quantity) in &totals {
            self.publish(
                StockUpdate::new(
                    StockAction::PoReceived,
                    items[line_item_id].variant_id,
                    *quantity,
                )
                .at_branch(order.branch_id)
                .for_purchase_order(po_id),
            );
        }
        if next != order.status {
            self.publish(Event::PurchaseOrderStatusChanged {
                purchase_order_id: po_id,
                old_status: order.status,
                new_status: next,
            });
        }

        Ok(PurchaseOrderDetails {
            order: updated_order,
            items: updated_items,
        })
    }

    /// Closes a fully received order. Inventory was materialized during receiving, so this only
    /// verifies it and records who completed the order.
    #[instrument(skip(self, notes))]
    pub async fn complete_purchase_order(
        &self,
        po_id: Uuid,
        completed_by: &str,
        notes: Option<String>,
    ) -> Result<purchase_order::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let order = find_order(&txn, po_id).await?;
        let items = order_items(&txn, po_id).await?;

        if order.status.next(PurchaseOrderAction::Complete).is_none() {
            let err =
                ServiceError::invalid_transition("purchase order", "complete", order.status);
            return Err(match shortfall_detail(&items) {
                Some(detail) => err.with_detail(detail),
                None => err,
            });
        }

        let total_received: u64 = items
            .iter()
            .map(|item| item.quantity_received.max(0) as u64)
            .sum();
        let materialized = InventoryItemEntity::find()
            .filter(inventory_item::Column::PurchaseOrderId.eq(po_id))
            .count(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if materialized != total_received {
            error!(
                purchase_order_id = %po_id,
                materialized,
                total_received,
                "Inventory items do not match received quantities"
            );
            return Err(ServiceError::InternalError(format!(
                "Purchase order {} has {} inventory items for {} received units",
                po_id, materialized, total_received
            )));
        }

        let next = claim(
            &txn,
            &order,
            PurchaseOrderAction::Complete,
            vec![
                (
                    purchase_order::Column::CompletedBy,
                    Expr::value(completed_by.to_string()),
                ),
                (purchase_order::Column::CompletedAt, Expr::value(Utc::now())),
                (purchase_order::Column::CompletionNotes, Expr::value(notes)),
            ],
        )
        .await?;

        let updated = find_order(&txn, po_id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("stockroom.purchase_orders.completed", 1);
        info!(purchase_order_id = %po_id, completed_by, "Purchase order completed");
        self.publish(Event::PurchaseOrderStatusChanged {
            purchase_order_id: po_id,
            old_status: order.status,
            new_status: next,
        });

        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_purchase_order(
        &self,
        po_id: Uuid,
    ) -> Result<PurchaseOrderDetails, ServiceError> {
        let db = &*self.db;
        let order = find_order(db, po_id).await?;
        let items = order_items(db, po_id).await?;
        Ok(PurchaseOrderDetails { order, items })
    }

    #[instrument(skip(self))]
    pub async fn receive_summary(&self, po_id: Uuid) -> Result<ReceiveSummary, ServiceError> {
        let details = self.get_purchase_order(po_id).await?;
        Ok(ReceiveSummary::new(&details.order, &details.items))
    }

    /// Inventory items created by receiving against this order, in receipt order.
    #[instrument(skip(self))]
    pub async fn received_items(
        &self,
        po_id: Uuid,
    ) -> Result<Vec<inventory_item::Model>, ServiceError> {
        let db = &*self.db;
        find_order(db, po_id).await?;

        InventoryItemEntity::find()
            .filter(inventory_item::Column::PurchaseOrderId.eq(po_id))
            .order_by_asc(inventory_item::Column::CreatedAt)
            .order_by_asc(inventory_item::Column::SerialNumber)
            .all(db)
            .await
            .map_err(ServiceError::db_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;

    fn line(line_item_id: Uuid, quantity: i32, serials: &[&str]) -> ReceiveLine {
        ReceiveLine {
            line_item_id,
            quantity,
            identifiers: serials.iter().map(|s| UnitIdentifier::serial(*s)).collect(),
            location: None,
        }
    }

    fn batch(lines: Vec<ReceiveLine>) -> ReceiveBatchRequest {
        ReceiveBatchRequest {
            received_by: "store-keeper".to_string(),
            lines,
        }
    }

    fn item(ordered: i32, received: i32) -> purchase_order_item::Model {
        let now = Utc::now();
        purchase_order_item::Model {
            id: Uuid::new_v4(),
            purchase_order_id: Uuid::nil(),
            product_id: Uuid::new_v4(),
            variant_id: Uuid::new_v4(),
            quantity_ordered: ordered,
            quantity_received: received,
            unit_cost: dec!(12.50),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn identifier_count_must_match_quantity() {
        let req = batch(vec![line(Uuid::new_v4(), 3, &["SN-1", "SN-2"])]);
        assert_matches!(req.check(), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn duplicate_identifier_inside_batch_is_refused() {
        let req = batch(vec![
            line(Uuid::new_v4(), 1, &["SN-1"]),
            line(Uuid::new_v4(), 1, &["SN-1"]),
        ]);
        assert_matches!(req.check(), Err(ServiceError::DuplicateIdentifier(v)) if v == "SN-1");
    }

    #[test]
    fn imei_shares_the_identifier_namespace() {
        let mut first = line(Uuid::new_v4(), 1, &["SN-1"]);
        first.identifiers[0].imei = Some("356938035643809".to_string());
        let second = line(Uuid::new_v4(), 1, &["356938035643809"]);
        assert_matches!(
            batch(vec![first, second]).check(),
            Err(ServiceError::DuplicateIdentifier(_))
        );
    }

    #[test]
    fn blank_identifier_is_refused() {
        let req = batch(vec![line(Uuid::new_v4(), 1, &["  "])]);
        assert_matches!(req.check(), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn repeated_lines_are_summed() {
        let id = Uuid::new_v4();
        let req = batch(vec![line(id, 2, &[]), line(id, 3, &[])]);
        assert!(req.check().is_ok());
        assert_eq!(req.totals().get(&id), Some(&5));
    }

    #[test]
    fn totals_do_not_overflow_on_huge_lines() {
        let id = Uuid::new_v4();
        let req = batch(vec![line(id, i32::MAX, &[]), line(id, 2, &[])]);
        assert_eq!(req.totals().get(&id), Some(&(i64::from(i32::MAX) + 2)));
    }

    #[test]
    fn shortfall_names_each_short_line() {
        let short = item(20, 18);
        let done = item(5, 5);
        let detail = shortfall_detail(&[short.clone(), done]).unwrap();
        assert!(detail.starts_with("2 units remaining"));
        assert!(detail.contains(&short.id.to_string()));
        assert!(shortfall_detail(&[item(3, 3)]).is_none());
    }

    #[test]
    fn summary_reports_progress() {
        let now = Utc::now();
        let order = purchase_order::Model {
            id: Uuid::new_v4(),
            order_number: "PO-1001".to_string(),
            supplier_id: Uuid::new_v4(),
            branch_id: Uuid::new_v4(),
            status: PurchaseOrderStatus::PartialReceived,
            total_amount: dec!(375.00),
            notes: None,
            created_by: "buyer".to_string(),
            received_date: Some(now),
            completed_at: None,
            completed_by: None,
            completion_notes: None,
            created_at: now,
            updated_at: now,
        };

        let summary = ReceiveSummary::new(&order, &[item(20, 5), item(10, 10)]);
        assert_eq!(summary.total_items, 2);
        assert_eq!(summary.completed_items, 1);
        assert_eq!(summary.total_ordered, 30);
        assert_eq!(summary.total_received, 15);
        assert_eq!(summary.completion_percentage, 50.0);
        assert!(!summary.can_complete);
        assert_eq!(summary.lines[0].remaining, 15);
    }
}
