use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

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
pub enum PurchaseOrderStatus {
    #[sea_orm(string_value = "draft")]
    Draft,
    #[sea_orm(string_value = "sent")]
    Sent,
    #[sea_orm(string_value = "partial_received")]
    PartialReceived,
    #[sea_orm(string_value = "received")]
    Received,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PurchaseOrderAction {
    Send,
    /// A receive batch; `fully_received` is whether every line is now complete.
    Receive { fully_received: bool },
    Complete,
    Cancel,
}

impl PurchaseOrderAction {
    pub fn as_str(self) -> &'static str {
        match self {
            PurchaseOrderAction::Send => "send",
            PurchaseOrderAction::Receive { .. } => "receive",
            PurchaseOrderAction::Complete => "complete",
            PurchaseOrderAction::Cancel => "cancel",
        }
    }
}

impl PurchaseOrderStatus {
    /// The purchase order transition table.
    pub fn next(self, action: PurchaseOrderAction) -> Option<PurchaseOrderStatus> {
        use PurchaseOrderAction as A;
        use PurchaseOrderStatus as S;

        match (self, action) {
            (S::Draft, A::Send) => Some(S::Sent),
            (S::Draft | S::Sent | S::PartialReceived | S::Received, A::Receive { fully_received }) => {
                Some(if fully_received {
                    S::Received
                } else {
                    S::PartialReceived
                })
            }
            (S::Received, A::Complete) => Some(S::Completed),
            (S::Draft | S::Sent, A::Cancel) => Some(S::Cancelled),
            _ => None,
        }
    }

    pub fn transition(
        self,
        action: PurchaseOrderAction,
    ) -> Result<PurchaseOrderStatus, ServiceError> {
        self.next(action).ok_or_else(|| {
            ServiceError::invalid_transition("purchase order", action.as_str(), self)
        })
    }

    pub fn accepts_receipts(self) -> bool {
        self.next(PurchaseOrderAction::Receive {
            fully_received: false,
        })
        .is_some()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "purchase_orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub order_number: String,
    pub supplier_id: Uuid,
    /// Branch the goods are received into.
    pub branch_id: Uuid,
    pub status: PurchaseOrderStatus,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub total_amount: Decimal,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub created_by: String,
    pub received_date: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub completion_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::purchase_order_item::Entity")]
    PurchaseOrderItems,
    #[sea_orm(has_many = "super::inventory_item::Entity")]
    InventoryItems,
}

impl Related<super::purchase_order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::PurchaseOrderItems.def()
    }
}

impl Related<super::inventory_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::InventoryItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rstest::rstest;

    #[rstest]
    #[case(PurchaseOrderStatus::Draft, true)]
    #[case(PurchaseOrderStatus::Sent, true)]
    #[case(PurchaseOrderStatus::PartialReceived, true)]
    #[case(PurchaseOrderStatus::Received, true)]
    #[case(PurchaseOrderStatus::Completed, false)]
    #[case(PurchaseOrderStatus::Cancelled, false)]
    fn receipts_blocked_only_once_closed(#[case] status: PurchaseOrderStatus, #[case] open: bool) {
        assert_eq!(status.accepts_receipts(), open);
    }

    #[test]
    fn receive_outcome_follows_line_totals() {
        let partial = PurchaseOrderStatus::Sent
            .transition(PurchaseOrderAction::Receive {
                fully_received: false,
            })
            .unwrap();
        assert_eq!(partial, PurchaseOrderStatus::PartialReceived);

        let full = partial
            .transition(PurchaseOrderAction::Receive {
                fully_received: true,
            })
            .unwrap();
        assert_eq!(full, PurchaseOrderStatus::Received);
    }

    #[test]
    fn only_received_orders_complete() {
        assert_eq!(
            PurchaseOrderStatus::Received
                .transition(PurchaseOrderAction::Complete)
                .unwrap(),
            PurchaseOrderStatus::Completed
        );
        for status in [
            PurchaseOrderStatus::Draft,
            PurchaseOrderStatus::Sent,
            PurchaseOrderStatus::PartialReceived,
            PurchaseOrderStatus::Completed,
            PurchaseOrderStatus::Cancelled,
        ] {
            assert_matches!(
                status.transition(PurchaseOrderAction::Complete),
                Err(ServiceError::InvalidTransition { .. })
            );
        }
    }

    #[test]
    fn cancel_is_refused_after_goods_arrive() {
        assert!(PurchaseOrderStatus::Sent
            .next(PurchaseOrderAction::Cancel)
            .is_some());
        assert!(PurchaseOrderStatus::PartialReceived
            .next(PurchaseOrderAction::Cancel)
            .is_none());
    }
}
