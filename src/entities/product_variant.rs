use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// A stock-keeping unit of a product at one branch.
///
/// `quantity` is the on-hand count. Rows referenced by another row's
/// `parent_variant_id` are parents: their stock is the sum over their active
/// children and their own `quantity`/`reserved_quantity` columns are not read.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "product_variants")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub product_id: Uuid,
    pub branch_id: Uuid,
    pub parent_variant_id: Option<Uuid>,
    pub sku: String,
    pub name: String,
    pub quantity: i32,
    pub reserved_quantity: i32,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub cost_price: Decimal,
    #[sea_orm(column_type = "Decimal(Some((16, 4)))")]
    pub selling_price: Decimal,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Whether the row may hold stock or reservations.
    pub fn is_live(&self) -> bool {
        self.is_active && self.deleted_at.is_none()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::branch::Entity",
        from = "Column::BranchId",
        to = "super::branch::Column::Id"
    )]
    Branch,
}

impl Related<super::branch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Branch.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
