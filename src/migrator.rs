use sea_orm_migration::prelude::*;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250301_000001_create_branches_table::Migration),
            Box::new(m20250301_000002_create_product_variants_table::Migration),
            Box::new(m20250301_000003_create_stock_transfers_table::Migration),
            Box::new(m20250301_000004_create_purchase_orders_tables::Migration),
            Box::new(m20250301_000005_create_inventory_items_table::Migration),
        ]
    }
}

// Migration implementations

mod m20250301_000001_create_branches_table {

    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000001_create_branches_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(Branches::Table)
                        .if_not_exists()
                        .col(ColumnDef::new(Branches::Id).uuid().primary_key().not_null())
                        .col(ColumnDef::new(Branches::Name).string_len(255).not_null())
                        .col(
                            ColumnDef::new(Branches::Code)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Branches::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Branches::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(Branches::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .to_owned(),
                )
                .await
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(Branches::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum Branches {
        Table,
        Id,
        Name,
        Code,
        IsActive,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000002_create_product_variants_table {

    use super::m20250301_000001_create_branches_table::Branches;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000002_create_product_variants_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(ProductVariants::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(ProductVariants::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(ProductVariants::ProductId).uuid().not_null())
                        .col(ColumnDef::new(ProductVariants::BranchId).uuid().not_null())
                        .col(ColumnDef::new(ProductVariants::ParentVariantId).uuid().null())
                        .col(
                            ColumnDef::new(ProductVariants::Sku)
                                .string_len(100)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::Name)
                                .string_len(255)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::Quantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::ReservedQuantity)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::CostPrice)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::SellingPrice)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::IsActive)
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::DeletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(ProductVariants::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_product_variants_branch_id")
                                .from(ProductVariants::Table, ProductVariants::BranchId)
                                .to(Branches::Table, Branches::Id)
                                .on_delete(ForeignKeyAction::Restrict),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_product_variants_branch_product")
                        .table(ProductVariants::Table)
                        .col(ProductVariants::BranchId)
                        .col(ProductVariants::ProductId)
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_product_variants_parent_variant_id")
                        .table(ProductVariants::Table)
                        .col(ProductVariants::ParentVariantId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(ProductVariants::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum ProductVariants {
        Table,
        Id,
        ProductId,
        BranchId,
        ParentVariantId,
        Sku,
        Name,
        Quantity,
        ReservedQuantity,
        CostPrice,
        SellingPrice,
        IsActive,
        DeletedAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000003_create_stock_transfers_table {

    use super::m20250301_000001_create_branches_table::Branches;
    use super::m20250301_000002_create_product_variants_table::ProductVariants;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000003_create_stock_transfers_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(StockTransfers::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(StockTransfers::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockTransfers::FromBranchId).uuid().not_null())
                        .col(ColumnDef::new(StockTransfers::ToBranchId).uuid().not_null())
                        .col(ColumnDef::new(StockTransfers::VariantId).uuid().not_null())
                        .col(
                            ColumnDef::new(StockTransfers::SourceVariantId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::DestinationVariantId)
                                .uuid()
                                .null(),
                        )
                        .col(ColumnDef::new(StockTransfers::Quantity).integer().not_null())
                        .col(
                            ColumnDef::new(StockTransfers::Status)
                                .string_len(32)
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::RequestedBy)
                                .string_len(255)
                                .not_null(),
                        )
                        .col(ColumnDef::new(StockTransfers::ApprovedBy).string_len(255).null())
                        .col(ColumnDef::new(StockTransfers::CompletedBy).string_len(255).null())
                        .col(ColumnDef::new(StockTransfers::Notes).text().null())
                        .col(ColumnDef::new(StockTransfers::RejectionReason).text().null())
                        .col(ColumnDef::new(StockTransfers::CancellationReason).text().null())
                        .col(
                            ColumnDef::new(StockTransfers::RequestedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::ApprovedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::ShippedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::CancelledAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(StockTransfers::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_transfers_from_branch_id")
                                .from(StockTransfers::Table, StockTransfers::FromBranchId)
                                .to(Branches::Table, Branches::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_transfers_to_branch_id")
                                .from(StockTransfers::Table, StockTransfers::ToBranchId)
                                .to(Branches::Table, Branches::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_stock_transfers_source_variant_id")
                                .from(StockTransfers::Table, StockTransfers::SourceVariantId)
                                .to(ProductVariants::Table, ProductVariants::Id),
                        )
                        .to_owned(),
                )
                .await?;

            // Backs the unresolved-transfer lookup on create.
            manager
                .create_index(
                    Index::create()
                        .name("idx_stock_transfers_route_status")
                        .table(StockTransfers::Table)
                        .col(StockTransfers::FromBranchId)
                        .col(StockTransfers::ToBranchId)
                        .col(StockTransfers::VariantId)
                        .col(StockTransfers::Status)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(StockTransfers::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum StockTransfers {
        Table,
        Id,
        FromBranchId,
        ToBranchId,
        VariantId,
        SourceVariantId,
        DestinationVariantId,
        Quantity,
        Status,
        RequestedBy,
        ApprovedBy,
        CompletedBy,
        Notes,
        RejectionReason,
        CancellationReason,
        RequestedAt,
        ApprovedAt,
        ShippedAt,
        CompletedAt,
        CancelledAt,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000004_create_purchase_orders_tables {

    use super::m20250301_000001_create_branches_table::Branches;
    use super::m20250301_000002_create_product_variants_table::ProductVariants;
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000004_create_purchase_orders_tables"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrders::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrders::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::OrderNumber)
                                .string_len(64)
                                .not_null()
                                .unique_key(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::SupplierId).uuid().not_null())
                        .col(ColumnDef::new(PurchaseOrders::BranchId).uuid().not_null())
                        .col(
                            ColumnDef::new(PurchaseOrders::Status)
                                .string_len(32)
                                .not_null()
                                .default("draft"),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::TotalAmount)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(ColumnDef::new(PurchaseOrders::Notes).text().null())
                        .col(
                            ColumnDef::new(PurchaseOrders::CreatedBy)
                                .string_len(255)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::ReceivedDate)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::CompletedAt)
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(ColumnDef::new(PurchaseOrders::CompletedBy).string_len(255).null())
                        .col(ColumnDef::new(PurchaseOrders::CompletionNotes).text().null())
                        .col(
                            ColumnDef::new(PurchaseOrders::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrders::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_orders_branch_id")
                                .from(PurchaseOrders::Table, PurchaseOrders::BranchId)
                                .to(Branches::Table, Branches::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_table(
                    Table::create()
                        .table(PurchaseOrderItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(PurchaseOrderItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::PurchaseOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(PurchaseOrderItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(PurchaseOrderItems::VariantId).uuid().not_null())
                        .col(
                            ColumnDef::new(PurchaseOrderItems::QuantityOrdered)
                                .integer()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::QuantityReceived)
                                .integer()
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::UnitCost)
                                .decimal_len(16, 4)
                                .not_null()
                                .default(0),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(PurchaseOrderItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_order_items_purchase_order_id")
                                .from(
                                    PurchaseOrderItems::Table,
                                    PurchaseOrderItems::PurchaseOrderId,
                                )
                                .to(PurchaseOrders::Table, PurchaseOrders::Id)
                                .on_delete(ForeignKeyAction::Cascade),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_purchase_order_items_variant_id")
                                .from(PurchaseOrderItems::Table, PurchaseOrderItems::VariantId)
                                .to(ProductVariants::Table, ProductVariants::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_purchase_order_items_purchase_order_id")
                        .table(PurchaseOrderItems::Table)
                        .col(PurchaseOrderItems::PurchaseOrderId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(PurchaseOrderItems::Table).to_owned())
                .await?;
            manager
                .drop_table(Table::drop().table(PurchaseOrders::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    pub enum PurchaseOrders {
        Table,
        Id,
        OrderNumber,
        SupplierId,
        BranchId,
        Status,
        TotalAmount,
        Notes,
        CreatedBy,
        ReceivedDate,
        CompletedAt,
        CompletedBy,
        CompletionNotes,
        CreatedAt,
        UpdatedAt,
    }

    #[derive(DeriveIden)]
    pub enum PurchaseOrderItems {
        Table,
        Id,
        PurchaseOrderId,
        ProductId,
        VariantId,
        QuantityOrdered,
        QuantityReceived,
        UnitCost,
        CreatedAt,
        UpdatedAt,
    }
}

mod m20250301_000005_create_inventory_items_table {

    use super::m20250301_000004_create_purchase_orders_tables::{
        PurchaseOrderItems, PurchaseOrders,
    };
    use sea_orm_migration::prelude::*;

    pub struct Migration;

    impl MigrationName for Migration {
        fn name(&self) -> &str {
            "m20250301_000005_create_inventory_items_table"
        }
    }

    #[async_trait::async_trait]
    impl MigrationTrait for Migration {
        async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .create_table(
                    Table::create()
                        .table(InventoryItems::Table)
                        .if_not_exists()
                        .col(
                            ColumnDef::new(InventoryItems::Id)
                                .uuid()
                                .primary_key()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::PurchaseOrderId)
                                .uuid()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::PurchaseOrderItemId)
                                .uuid()
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryItems::ProductId).uuid().not_null())
                        .col(ColumnDef::new(InventoryItems::VariantId).uuid().not_null())
                        .col(ColumnDef::new(InventoryItems::BranchId).uuid().not_null())
                        .col(
                            ColumnDef::new(InventoryItems::SerialNumber)
                                .string_len(128)
                                .null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::Imei)
                                .string_len(64)
                                .null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::Status)
                                .string_len(32)
                                .not_null()
                                .default("available"),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::CostPrice)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::SellingPrice)
                                .decimal_len(16, 4)
                                .not_null(),
                        )
                        .col(ColumnDef::new(InventoryItems::Location).string_len(255).null())
                        .col(ColumnDef::new(InventoryItems::Notes).text().null())
                        .col(
                            ColumnDef::new(InventoryItems::ReceivedBy)
                                .string_len(255)
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::PurchaseDate)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::CreatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .col(
                            ColumnDef::new(InventoryItems::UpdatedAt)
                                .timestamp_with_time_zone()
                                .not_null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_items_purchase_order_id")
                                .from(InventoryItems::Table, InventoryItems::PurchaseOrderId)
                                .to(PurchaseOrders::Table, PurchaseOrders::Id),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_inventory_items_purchase_order_item_id")
                                .from(InventoryItems::Table, InventoryItems::PurchaseOrderItemId)
                                .to(PurchaseOrderItems::Table, PurchaseOrderItems::Id),
                        )
                        .to_owned(),
                )
                .await?;

            manager
                .create_index(
                    Index::create()
                        .name("idx_inventory_items_purchase_order_id")
                        .table(InventoryItems::Table)
                        .col(InventoryItems::PurchaseOrderId)
                        .to_owned(),
                )
                .await?;

            Ok(())
        }

        async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
            manager
                .drop_table(Table::drop().table(InventoryItems::Table).to_owned())
                .await
        }
    }

    #[derive(DeriveIden)]
    enum InventoryItems {
        Table,
        Id,
        PurchaseOrderId,
        PurchaseOrderItemId,
        ProductId,
        VariantId,
        BranchId,
        SerialNumber,
        Imei,
        Status,
        CostPrice,
        SellingPrice,
        Location,
        Notes,
        ReceivedBy,
        PurchaseDate,
        CreatedAt,
        UpdatedAt,
    }
}
