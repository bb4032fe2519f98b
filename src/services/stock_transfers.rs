use chrono::Utc;
use metrics::{counter, histogram};
use sea_orm::sea_query::{Expr, SimpleExpr};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, Condition, ConnectionTrait,
    DatabaseConnection, EntityTrait, Iterable, QueryFilter, QueryOrder, QuerySelect,
    TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use crate::{
    entities::{
        branch::{self, Entity as BranchEntity},
        product_variant::{self, Entity as ProductVariantEntity},
        stock_transfer::{self, Entity as StockTransferEntity},
        TransferAction, TransferStatus,
    },
    errors::ServiceError,
    events::{Event, EventSender, StockAction, StockUpdate},
    services::inventory_ledger,
};

/// Request to move stock of one variant between two branches.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateTransferRequest {
    pub from_branch_id: Uuid,
    pub to_branch_id: Uuid,
    pub variant_id: Uuid,
    #[validate(range(min = 1, message = "Quantity must be greater than zero"))]
    pub quantity: i32,
    #[validate(length(min = 1, max = 100))]
    pub requested_by: String,
    #[validate(length(max = 500))]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferFilter {
    /// Matches transfers leaving or arriving at this branch.
    pub branch_id: Option<Uuid>,
    pub status: Option<TransferStatus>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStats {
    pub total: u64,
    pub pending: u64,
    pub approved: u64,
    pub in_transit: u64,
    pub completed: u64,
    pub rejected: u64,
    pub cancelled: u64,
    pub total_quantity: i64,
}

impl TransferStats {
    fn record(&mut self, transfer: &stock_transfer::Model) {
        self.total += 1;
        self.total_quantity += i64::from(transfer.quantity);
        let bucket = match transfer.status {
            TransferStatus::Pending => &mut self.pending,
            TransferStatus::Approved => &mut self.approved,
            TransferStatus::InTransit => &mut self.in_transit,
            TransferStatus::Completed => &mut self.completed,
            TransferStatus::Rejected => &mut self.rejected,
            TransferStatus::Cancelled => &mut self.cancelled,
        };
        *bucket += 1;
    }
}

async fn find_transfer<C: ConnectionTrait>(
    conn: &C,
    transfer_id: Uuid,
) -> Result<stock_transfer::Model, ServiceError> {
    StockTransferEntity::find_by_id(transfer_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Transfer {} not found", transfer_id)))
}

async fn find_active_branch<C: ConnectionTrait>(
    conn: &C,
    branch_id: Uuid,
) -> Result<branch::Model, ServiceError> {
    let branch = BranchEntity::find_by_id(branch_id)
        .one(conn)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::NotFound(format!("Branch {} not found", branch_id)))?;

    if !branch.is_active {
        return Err(ServiceError::ValidationError(format!(
            "Branch {} is inactive",
            branch.code
        )));
    }
    Ok(branch)
}

/// Moves a transfer from the status it was read in to the next one, and only from that status.
///
/// The status check and the write are one conditional `UPDATE`. When another caller got there
/// first the row is re-read so the error reflects what actually happened.
async fn claim<C: ConnectionTrait>(
    conn: &C,
    transfer: &stock_transfer::Model,
    action: TransferAction,
    columns: Vec<(stock_transfer::Column, SimpleExpr)>,
) -> Result<TransferStatus, ServiceError> {
    let next = transfer.status.transition(action, transfer.id)?;

    let mut update = StockTransferEntity::update_many()
        .col_expr(stock_transfer::Column::Status, Expr::value(next))
        .col_expr(stock_transfer::Column::UpdatedAt, Expr::value(Utc::now()));
    for (column, value) in columns {
        update = update.col_expr(column, value);
    }

    let result = update
        .filter(stock_transfer::Column::Id.eq(transfer.id))
        .filter(stock_transfer::Column::Status.eq(transfer.status))
        .exec(conn)
        .await
        .map_err(ServiceError::db_error)?;

    if result.rows_affected == 0 {
        let current = find_transfer(conn, transfer.id).await?;
        current.status.transition(action, current.id)?;
        return Err(ServiceError::InternalError(format!(
            "Transfer {} changed concurrently during {}",
            transfer.id,
            action.as_str()
        )));
    }

    Ok(next)
}

/// The live leaf variant at `branch_id` matching the source's product and SKU, created empty if
/// absent. Parent variants are skipped: their on-hand is the sum of their children.
async fn resolve_destination_variant<C: ConnectionTrait>(
    conn: &C,
    source: &product_variant::Model,
    branch_id: Uuid,
) -> Result<product_variant::Model, ServiceError> {
    let candidates = ProductVariantEntity::find()
        .filter(product_variant::Column::BranchId.eq(branch_id))
        .filter(product_variant::Column::ProductId.eq(source.product_id))
        .filter(product_variant::Column::Sku.eq(source.sku.clone()))
        .filter(product_variant::Column::IsActive.eq(true))
        .filter(product_variant::Column::DeletedAt.is_null())
        .order_by_asc(product_variant::Column::CreatedAt)
        .order_by_asc(product_variant::Column::Id)
        .all(conn)
        .await
        .map_err(ServiceError::db_error)?;

    for candidate in candidates {
        if !inventory_ledger::is_parent(conn, candidate.id).await? {
            return Ok(candidate);
        }
    }

    let now = Utc::now();
    let variant = product_variant::ActiveModel {
        id: Set(Uuid::new_v4()),
        product_id: Set(source.product_id),
        branch_id: Set(branch_id),
        parent_variant_id: Set(None),
        sku: Set(source.sku.clone()),
        name: Set(source.name.clone()),
        quantity: Set(0),
        reserved_quantity: Set(0),
        cost_price: Set(source.cost_price),
        selling_price: Set(source.selling_price),
        is_active: Set(true),
        deleted_at: Set(None),
        created_at: Set(now),
        updated_at: Set(now),
    }
    .insert(conn)
    .await
    .map_err(ServiceError::db_error)?;

    info!(
        variant_id = %variant.id,
        branch_id = %branch_id,
        sku = %variant.sku,
        "Created destination variant"
    );
    Ok(variant)
}

/// Inter-branch stock transfers: reservation at request time, human-gated approval and
/// shipping, and a single transactional completion.
#[derive(Clone)]
pub struct StockTransferService {
    db: Arc<DatabaseConnection>,
    event_sender: Option<EventSender>,
}

impl StockTransferService {
    pub fn new(db: Arc<DatabaseConnection>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    fn publish(&self, event: impl Into<Event>) {
        if let Some(sender) = &self.event_sender {
            sender.send_or_log(event);
        }
    }

    /// Creates a pending transfer and reserves its stock in the same transaction.
    #[instrument(skip(self, request), fields(variant_id = %request.variant_id, quantity = request.quantity))]
    pub async fn create_transfer(
        &self,
        request: CreateTransferRequest,
    ) -> Result<stock_transfer::Model, ServiceError> {
        request.validate()?;

        if request.from_branch_id == request.to_branch_id {
            return Err(ServiceError::ValidationError(
                "Cannot transfer to the same branch".to_string(),
            ));
        }

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        find_active_branch(&txn, request.from_branch_id).await?;
        find_active_branch(&txn, request.to_branch_id).await?;

        let variant = inventory_ledger::find_variant(&txn, request.variant_id).await?;
        if variant.branch_id != request.from_branch_id {
            return Err(ServiceError::ValidationError(format!(
                "Variant {} does not belong to the source branch",
                variant.id
            )));
        }

        let existing = StockTransferEntity::find()
            .filter(stock_transfer::Column::FromBranchId.eq(request.from_branch_id))
            .filter(stock_transfer::Column::ToBranchId.eq(request.to_branch_id))
            .filter(stock_transfer::Column::VariantId.eq(request.variant_id))
            .filter(
                stock_transfer::Column::Status
                    .is_in(TransferStatus::iter().filter(|status| status.is_unresolved())),
            )
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        if let Some(existing) = existing {
            warn!(existing_id = %existing.id, "Unresolved transfer already exists");
            return Err(ServiceError::DuplicateTransfer {
                existing_id: existing.id,
            });
        }

        let holder = inventory_ledger::reserve(&txn, request.variant_id, request.quantity).await?;

        let now = Utc::now();
        let transfer = stock_transfer::ActiveModel {
            id: Set(Uuid::new_v4()),
            from_branch_id: Set(request.from_branch_id),
            to_branch_id: Set(request.to_branch_id),
            variant_id: Set(request.variant_id),
            source_variant_id: Set(holder),
            destination_variant_id: Set(None),
            quantity: Set(request.quantity),
            status: Set(TransferStatus::Pending),
            requested_by: Set(request.requested_by),
            approved_by: Set(None),
            completed_by: Set(None),
            notes: Set(request.notes),
            rejection_reason: Set(None),
            cancellation_reason: Set(None),
            requested_at: Set(now),
            approved_at: Set(None),
            shipped_at: Set(None),
            completed_at: Set(None),
            cancelled_at: Set(None),
            created_at: Set(now),
            updated_at: Set(now),
        }
        .insert(&txn)
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to insert transfer");
            ServiceError::db_error(e)
        })?;

        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("stockroom.transfers.created", 1);
        info!(transfer_id = %transfer.id, "Transfer created with stock reserved");
        self.publish(
            StockUpdate::new(StockAction::TransferCreated, holder, transfer.quantity)
                .at_branch(transfer.from_branch_id)
                .for_transfer(transfer.id),
        );

        Ok(transfer)
    }

    #[instrument(skip(self))]
    pub async fn approve_transfer(
        &self,
        transfer_id: Uuid,
        approved_by: &str,
    ) -> Result<stock_transfer::Model, ServiceError> {
        let db = &*self.db;
        let transfer = find_transfer(db, transfer_id).await?;

        let next = claim(
            db,
            &transfer,
            TransferAction::Approve,
            vec![
                (
                    stock_transfer::Column::ApprovedBy,
                    Expr::value(approved_by.to_string()),
                ),
                (stock_transfer::Column::ApprovedAt, Expr::value(Utc::now())),
            ],
        )
        .await?;

        counter!("stockroom.transfers.approved", 1);
        info!(transfer_id = %transfer_id, approved_by, "Transfer approved");
        self.publish(Event::TransferStatusChanged {
            transfer_id,
            old_status: transfer.status,
            new_status: next,
        });

        find_transfer(db, transfer_id).await
    }

    /// Rejects a pending transfer and returns its reservation. `notes` is left untouched.
    #[instrument(skip(self))]
    pub async fn reject_transfer(
        &self,
        transfer_id: Uuid,
        rejected_by: &str,
        reason: Option<String>,
    ) -> Result<stock_transfer::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let transfer = find_transfer(&txn, transfer_id).await?;

        claim(
            &txn,
            &transfer,
            TransferAction::Reject,
            vec![
                (
                    stock_transfer::Column::ApprovedBy,
                    Expr::value(rejected_by.to_string()),
                ),
                (stock_transfer::Column::ApprovedAt, Expr::value(Utc::now())),
                (stock_transfer::Column::RejectionReason, Expr::value(reason)),
            ],
        )
        .await?;
        inventory_ledger::release(&txn, transfer.source_variant_id, transfer.quantity).await?;

        let updated = find_transfer(&txn, transfer_id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("stockroom.transfers.rejected", 1);
        info!(transfer_id = %transfer_id, rejected_by, "Transfer rejected and stock released");
        self.publish(
            StockUpdate::new(
                StockAction::TransferRejected,
                transfer.source_variant_id,
                transfer.quantity,
            )
            .at_branch(transfer.from_branch_id)
            .for_transfer(transfer_id),
        );

        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn mark_in_transit(
        &self,
        transfer_id: Uuid,
    ) -> Result<stock_transfer::Model, ServiceError> {
        let db = &*self.db;
        let transfer = find_transfer(db, transfer_id).await?;

        let next = claim(
            db,
            &transfer,
            TransferAction::Ship,
            vec![(stock_transfer::Column::ShippedAt, Expr::value(Utc::now()))],
        )
        .await?;

        counter!("stockroom.transfers.shipped", 1);
        info!(transfer_id = %transfer_id, "Transfer marked in transit");
        self.publish(Event::TransferStatusChanged {
            transfer_id,
            old_status: transfer.status,
            new_status: next,
        });

        find_transfer(db, transfer_id).await
    }

    /// Completes an in-transit transfer: consumes the reservation at the source and credits the
    /// destination, all in one transaction. A second call fails with `AlreadyCompleted`.
    #[instrument(skip(self))]
    pub async fn complete_transfer(
        &self,
        transfer_id: Uuid,
        completed_by: Option<String>,
    ) -> Result<stock_transfer::Model, ServiceError> {
        let started = Instant::now();
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let transfer = find_transfer(&txn, transfer_id).await?;

        // Fail fast before creating a destination variant.
        transfer
            .status
            .transition(TransferAction::Complete, transfer.id)?;

        let source = inventory_ledger::find_variant(&txn, transfer.source_variant_id).await?;
        let destination = resolve_destination_variant(&txn, &source, transfer.to_branch_id).await?;

        claim(
            &txn,
            &transfer,
            TransferAction::Complete,
            vec![
                (stock_transfer::Column::CompletedBy, Expr::value(completed_by)),
                (stock_transfer::Column::CompletedAt, Expr::value(Utc::now())),
                (
                    stock_transfer::Column::DestinationVariantId,
                    Expr::value(destination.id),
                ),
            ],
        )
        .await?;

        inventory_ledger::consume_reservation(&txn, source.id, transfer.quantity).await?;
        inventory_ledger::adjust_on_hand(&txn, destination.id, transfer.quantity).await?;

        let updated = find_transfer(&txn, transfer_id).await?;
        txn.commit().await.map_err(|e| {
            error!(transfer_id = %transfer_id, error = %e, "Failed to commit transfer completion");
            ServiceError::db_error(e)
        })?;

        counter!("stockroom.transfers.completed", 1);
        histogram!(
            "stockroom.transfers.complete_duration_seconds",
            started.elapsed().as_secs_f64()
        );
        info!(
            transfer_id = %transfer_id,
            source_variant_id = %source.id,
            destination_variant_id = %destination.id,
            quantity = transfer.quantity,
            "Transfer completed"
        );
        self.publish(
            StockUpdate::new(StockAction::TransferCompleted, source.id, transfer.quantity)
                .at_branch(transfer.from_branch_id)
                .for_transfer(transfer_id),
        );
        self.publish(
            StockUpdate::new(
                StockAction::TransferCompleted,
                destination.id,
                transfer.quantity,
            )
            .at_branch(transfer.to_branch_id)
            .for_transfer(transfer_id),
        );

        Ok(updated)
    }

    /// Cancels a pending or approved transfer and returns its reservation.
    #[instrument(skip(self))]
    pub async fn cancel_transfer(
        &self,
        transfer_id: Uuid,
        reason: Option<String>,
    ) -> Result<stock_transfer::Model, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let transfer = find_transfer(&txn, transfer_id).await?;

        claim(
            &txn,
            &transfer,
            TransferAction::Cancel,
            vec![
                (
                    stock_transfer::Column::CancellationReason,
                    Expr::value(reason),
                ),
                (stock_transfer::Column::CancelledAt, Expr::value(Utc::now())),
            ],
        )
        .await?;
        inventory_ledger::release(&txn, transfer.source_variant_id, transfer.quantity).await?;

        let updated = find_transfer(&txn, transfer_id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        counter!("stockroom.transfers.cancelled", 1);
        info!(transfer_id = %transfer_id, "Transfer cancelled and stock released");
        self.publish(
            StockUpdate::new(
                StockAction::TransferCancelled,
                transfer.source_variant_id,
                transfer.quantity,
            )
            .at_branch(transfer.from_branch_id)
            .for_transfer(transfer_id),
        );

        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn get_transfer(
        &self,
        transfer_id: Uuid,
    ) -> Result<stock_transfer::Model, ServiceError> {
        find_transfer(&*self.db, transfer_id).await
    }

    /// Newest first.
    #[instrument(skip(self))]
    pub async fn list_transfers(
        &self,
        filter: TransferFilter,
    ) -> Result<Vec<stock_transfer::Model>, ServiceError> {
        let mut query = StockTransferEntity::find();

        if let Some(branch_id) = filter.branch_id {
            query = query.filter(
                Condition::any()
                    .add(stock_transfer::Column::FromBranchId.eq(branch_id))
                    .add(stock_transfer::Column::ToBranchId.eq(branch_id)),
            );
        }
        if let Some(status) = filter.status {
            query = query.filter(stock_transfer::Column::Status.eq(status));
        }
        if let Some(limit) = filter.limit {
            query = query.limit(limit);
        }

        query
            .order_by_desc(stock_transfer::Column::CreatedAt)
            .order_by_desc(stock_transfer::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }

    #[instrument(skip(self))]
    pub async fn transfer_stats(
        &self,
        branch_id: Option<Uuid>,
    ) -> Result<TransferStats, ServiceError> {
        let transfers = self
            .list_transfers(TransferFilter {
                branch_id,
                ..Default::default()
            })
            .await?;

        Ok(transfers
            .iter()
            .fold(TransferStats::default(), |mut stats, transfer| {
                stats.record(transfer);
                stats
            }))
    }

    /// Transfers where the variant was requested, reserved at the source, or credited.
    #[instrument(skip(self))]
    pub async fn variant_transfer_history(
        &self,
        variant_id: Uuid,
    ) -> Result<Vec<stock_transfer::Model>, ServiceError> {
        StockTransferEntity::find()
            .filter(
                Condition::any()
                    .add(stock_transfer::Column::VariantId.eq(variant_id))
                    .add(stock_transfer::Column::SourceVariantId.eq(variant_id))
                    .add(stock_transfer::Column::DestinationVariantId.eq(variant_id)),
            )
            .order_by_desc(stock_transfer::Column::CreatedAt)
            .order_by_desc(stock_transfer::Column::Id)
            .all(&*self.db)
            .await
            .map_err(ServiceError::db_error)
    }
}
