//! Inventory ledger and reservation engine.
//!
//! Every write to `product_variants.quantity` or `product_variants.reserved_quantity`
//! goes through this module. Each write is a single conditional `UPDATE`, so the
//! availability check and the mutation are never two separate statements.
//!
//! The free functions are generic over [`ConnectionTrait`] so the transfer and
//! receiving workflows can run them inside their own transactions.
//! [`InventoryLedger`] wraps them for standalone use.

use chrono::Utc;
use metrics::counter;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::entities::product_variant::{self, Entity as ProductVariantEntity};
use crate::errors::ServiceError;
use crate::events::{EventSender, StockAction, StockUpdate};

/// Stock figures for one variant after parent aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    pub variant_id: Uuid,
    pub on_hand: i32,
    pub reserved: i32,
    /// `on_hand - reserved`, never below zero.
    pub available: i32,
    pub is_parent: bool,
}

impl StockLevel {
    fn from_totals(variant_id: Uuid, on_hand: i32, reserved: i32, is_parent: bool) -> Self {
        let raw = on_hand - reserved;
        if raw < 0 {
            // Left as stored; only the decision value is clamped.
            warn!(
                variant_id = %variant_id,
                on_hand,
                reserved,
                "Reserved quantity exceeds on-hand stock"
            );
        }
        Self {
            variant_id,
            on_hand,
            reserved,
            available: raw.max(0),
            is_parent,
        }
    }
}

pub(crate) async fn find_variant<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
) -> Result<product_variant::Model, ServiceError> {
    ProductVariantEntity::find_by_id(variant_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .filter(|variant| variant.deleted_at.is_none())
        .ok_or_else(|| ServiceError::NotFound(format!("Variant {} not found", variant_id)))
}

/// All non-deleted children of `parent_id`, oldest first.
async fn children_of<C: ConnectionTrait>(
    conn: &C,
    parent_id: Uuid,
) -> Result<Vec<product_variant::Model>, ServiceError> {
    ProductVariantEntity::find()
        .filter(product_variant::Column::ParentVariantId.eq(parent_id))
        .filter(product_variant::Column::DeletedAt.is_null())
        .order_by_asc(product_variant::Column::CreatedAt)
        .order_by_asc(product_variant::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)
}

/// A variant with any non-deleted child is a parent; its stock lives on the children.
pub(crate) async fn is_parent<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
) -> Result<bool, ServiceError> {
    let children = ProductVariantEntity::find()
        .filter(product_variant::Column::ParentVariantId.eq(variant_id))
        .filter(product_variant::Column::DeletedAt.is_null())
        .count(conn)
        .await
        .map_err(ServiceError::db_error)?;
    Ok(children > 0)
}

fn aggregate(variant_id: Uuid, children: &[product_variant::Model]) -> StockLevel {
    let (on_hand, reserved) = children
        .iter()
        .filter(|child| child.is_live())
        .fold((0, 0), |(on_hand, reserved), child| {
            (on_hand + child.quantity, reserved + child.reserved_quantity)
        });
    StockLevel::from_totals(variant_id, on_hand, reserved, true)
}

pub(crate) async fn stock_level<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
) -> Result<StockLevel, ServiceError> {
    let variant = find_variant(conn, variant_id).await?;
    let children = children_of(conn, variant.id).await?;

    if children.is_empty() {
        Ok(StockLevel::from_totals(
            variant.id,
            variant.quantity,
            variant.reserved_quantity,
            false,
        ))
    } else {
        Ok(aggregate(variant.id, &children))
    }
}

/// `reserved += quantity` on one row, only if `quantity - reserved >= quantity`.
async fn reserve_row<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
    quantity: i32,
) -> Result<bool, ServiceError> {
    let result = ProductVariantEntity::update_many()
        .col_expr(
            product_variant::Column::ReservedQuantity,
            Expr::col(product_variant::Column::ReservedQuantity).add(quantity),
        )
        .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product_variant::Column::Id.eq(variant_id))
        .filter(product_variant::Column::IsActive.eq(true))
        .filter(product_variant::Column::DeletedAt.is_null())
        .filter(
            Expr::expr(
                Expr::col(product_variant::Column::Quantity)
                    .sub(Expr::col(product_variant::Column::ReservedQuantity)),
            )
            .gte(quantity),
        )
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(result.rows_affected == 1)
}

/// Reserves `quantity` of `variant_id` and returns the ledger row that now holds it.
///
/// Leaf variants are reserved in place. For a parent the reservation lands on the
/// first live child that can cover the whole quantity by itself; requests are not
/// split across children.
#[instrument(skip(conn))]
pub(crate) async fn reserve<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
    quantity: i32,
) -> Result<Uuid, ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(
            "Reservation quantity must be greater than zero".to_string(),
        ));
    }

    let variant = find_variant(conn, variant_id).await?;
    let children = children_of(conn, variant.id).await?;

    if children.is_empty() {
        if !variant.is_active {
            return Err(ServiceError::ValidationError(format!(
                "Variant {} is inactive",
                variant_id
            )));
        }
        if reserve_row(conn, variant.id, quantity).await? {
            counter!("stockroom.reservations.granted", 1);
            debug!(variant_id = %variant.id, quantity, "Reserved stock");
            return Ok(variant.id);
        }
    } else {
        for child in children.iter().filter(|child| child.is_live()) {
            if child.quantity - child.reserved_quantity < quantity {
                continue;
            }
            if reserve_row(conn, child.id, quantity).await? {
                counter!("stockroom.reservations.granted", 1);
                debug!(
                    parent_variant_id = %variant.id,
                    variant_id = %child.id,
                    quantity,
                    "Reserved stock on child variant"
                );
                return Ok(child.id);
            }
        }
    }

    counter!("stockroom.reservations.denied", 1);
    let level = stock_level(conn, variant_id).await?;
    Err(ServiceError::InsufficientStock {
        variant_id,
        requested: quantity,
        available: level.available,
    })
}

/// `reserved -= quantity`, floored at zero.
#[instrument(skip(conn))]
pub(crate) async fn release<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    if quantity <= 0 {
        return Err(ServiceError::ValidationError(
            "Release quantity must be greater than zero".to_string(),
        ));
    }

    let floored = Expr::case(
        Expr::col(product_variant::Column::ReservedQuantity).gte(quantity),
        Expr::col(product_variant::Column::ReservedQuantity).sub(quantity),
    )
    .finally(0);

    let result = ProductVariantEntity::update_many()
        .col_expr(product_variant::Column::ReservedQuantity, floored.into())
        .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product_variant::Column::Id.eq(variant_id))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        return Err(ServiceError::NotFound(format!(
            "Variant {} not found",
            variant_id
        )));
    }

    counter!("stockroom.reservations.released", 1);
    debug!(variant_id = %variant_id, quantity, "Released reservation");
    Ok(())
}

/// Turns a reservation into a shipment: on-hand and reserved both drop by `quantity`.
pub(crate) async fn consume_reservation<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
    quantity: i32,
) -> Result<(), ServiceError> {
    let result = ProductVariantEntity::update_many()
        .col_expr(
            product_variant::Column::Quantity,
            Expr::col(product_variant::Column::Quantity).sub(quantity),
        )
        .col_expr(
            product_variant::Column::ReservedQuantity,
            Expr::col(product_variant::Column::ReservedQuantity).sub(quantity),
        )
        .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product_variant::Column::Id.eq(variant_id))
        .filter(product_variant::Column::ReservedQuantity.gte(quantity))
        .filter(product_variant::Column::Quantity.gte(quantity))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        let variant = find_variant(conn, variant_id).await?;
        return Err(ServiceError::InternalError(format!(
            "Variant {} holds no reservation of {} (on hand {}, reserved {})",
            variant_id, quantity, variant.quantity, variant.reserved_quantity
        )));
    }

    Ok(())
}

/// Adds `delta` to on-hand stock. Refuses to leave on-hand below the reserved quantity, and
/// refuses parent variants, whose on-hand figure is derived from their children.
pub(crate) async fn adjust_on_hand<C: ConnectionTrait>(
    conn: &C,
    variant_id: Uuid,
    delta: i32,
) -> Result<(), ServiceError> {
    if is_parent(conn, variant_id).await? {
        return Err(ServiceError::ValidationError(format!(
            "Variant {} is a parent; adjust one of its child variants instead",
            variant_id
        )));
    }

    let result = ProductVariantEntity::update_many()
        .col_expr(
            product_variant::Column::Quantity,
            Expr::col(product_variant::Column::Quantity).add(delta),
        )
        .col_expr(product_variant::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(product_variant::Column::Id.eq(variant_id))
        .filter(
            Expr::expr(Expr::col(product_variant::Column::Quantity).add(delta))
                .gte(Expr::col(product_variant::Column::ReservedQuantity)),
        )
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        let variant = find_variant(conn, variant_id).await?;
        return Err(ServiceError::ValidationError(format!(
            "Adjusting variant {} by {} would leave on hand ({}) below reserved ({})",
            variant_id,
            delta,
            variant.quantity + delta,
            variant.reserved_quantity
        )));
    }

    Ok(())
}

/// Standalone access to the ledger for callers outside the workflows.
#[derive(Clone)]
pub struct InventoryLedger {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl InventoryLedger {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// `on_hand - reserved`, aggregated over live children for a parent variant.
    #[instrument(skip(self))]
    pub async fn get_available_stock(&self, variant_id: Uuid) -> Result<i32, ServiceError> {
        Ok(stock_level(&*self.db, variant_id).await?.available)
    }

    #[instrument(skip(self))]
    pub async fn stock_level(&self, variant_id: Uuid) -> Result<StockLevel, ServiceError> {
        stock_level(&*self.db, variant_id).await
    }

    /// Reserves stock and returns the variant row holding the reservation.
    #[instrument(skip(self))]
    pub async fn reserve(&self, variant_id: Uuid, quantity: i32) -> Result<Uuid, ServiceError> {
        let holder = reserve(&*self.db, variant_id, quantity).await?;

        info!(variant_id = %holder, quantity, "Stock reserved");
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(StockUpdate::new(StockAction::Reserved, holder, quantity));
        }
        Ok(holder)
    }

    /// Releases a reservation held on `variant_id`. Parent variants hold none.
    #[instrument(skip(self))]
    pub async fn release(&self, variant_id: Uuid, quantity: i32) -> Result<(), ServiceError> {
        let db = &*self.db;
        if is_parent(db, variant_id).await? {
            return Err(ServiceError::ValidationError(format!(
                "Variant {} is a parent; release the child variant holding the reservation",
                variant_id
            )));
        }

        release(db, variant_id, quantity).await?;

        info!(variant_id = %variant_id, quantity, "Reservation released");
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(StockUpdate::new(
                StockAction::Released,
                variant_id,
                quantity,
            ));
        }
        Ok(())
    }
}
