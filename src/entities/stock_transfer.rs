use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::Iterable;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Lifecycle of an inter-branch transfer.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(32))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransferStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "in_transit")]
    InTransit,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "rejected")]
    Rejected,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

/// Operations that move a transfer between statuses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransferAction {
    Approve,
    Reject,
    Ship,
    Complete,
    Cancel,
}

impl TransferAction {
    pub fn as_str(self) -> &'static str {
        match self {
            TransferAction::Approve => "approve",
            TransferAction::Reject => "reject",
            TransferAction::Ship => "ship",
            TransferAction::Complete => "complete",
            TransferAction::Cancel => "cancel",
        }
    }

    /// Statuses from which this action is accepted, read off the transition table.
    pub fn allowed_from(self) -> Vec<TransferStatus> {
        TransferStatus::iter()
            .filter(|status| status.next(self).is_some())
            .collect()
    }
}

impl TransferStatus {
    /// The transfer transition table. `None` means the action is not permitted.
    pub fn next(self, action: TransferAction) -> Option<TransferStatus> {
        use TransferAction as A;
        use TransferStatus as S;

        match (self, action) {
            (S::Pending, A::Approve) => Some(S::Approved),
            (S::Pending, A::Reject) => Some(S::Rejected),
            (S::Approved, A::Ship) => Some(S::InTransit),
            (S::InTransit, A::Complete) => Some(S::Completed),
            (S::Pending | S::Approved, A::Cancel) => Some(S::Cancelled),
            _ => None,
        }
    }

    /// Applies `action`, producing the error a caller sees when it is not permitted.
    pub fn transition(
        self,
        action: TransferAction,
        transfer_id: Uuid,
    ) -> Result<TransferStatus, ServiceError> {
        if let Some(next) = self.next(action) {
            return Ok(next);
        }

        if self == TransferStatus::Completed && action == TransferAction::Complete {
            return Err(ServiceError::AlreadyCompleted(transfer_id));
        }

        let required = action
            .allowed_from()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" or ");

        Err(
            ServiceError::invalid_transition("transfer", action.as_str(), self)
                .with_detail(format!("requires {}", required)),
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferStatus::Completed | TransferStatus::Rejected | TransferStatus::Cancelled
        )
    }

    /// Pending and approved transfers still hold a reservation.
    pub fn is_unresolved(self) -> bool {
        matches!(self, TransferStatus::Pending | TransferStatus::Approved)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_transfers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub from_branch_id: Uuid,
    pub to_branch_id: Uuid,
    /// Variant named in the request; may be a parent.
    pub variant_id: Uuid,
    /// Ledger row holding the reservation.
    pub source_variant_id: Uuid,
    pub destination_variant_id: Option<Uuid>,
    pub quantity: i32,
    pub status: TransferStatus,
    pub requested_by: String,
    pub approved_by: Option<String>,
    pub completed_by: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub rejection_reason: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub cancellation_reason: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::branch::Entity",
        from = "Column::FromBranchId",
        to = "super::branch::Column::Id"
    )]
    FromBranch,
    #[sea_orm(
        belongs_to = "super::branch::Entity",
        from = "Column::ToBranchId",
        to = "super::branch::Column::Id"
    )]
    ToBranch,
    #[sea_orm(
        belongs_to = "super::product_variant::Entity",
        from = "Column::SourceVariantId",
        to = "super::product_variant::Column::Id"
    )]
    SourceVariant,
}

impl ActiveModelBehavior for ActiveModel {}
