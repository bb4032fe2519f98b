pub mod branch;
pub mod inventory_item;
pub mod product_variant;
pub mod purchase_order;
pub mod purchase_order_item;
pub mod stock_transfer;

pub use inventory_item::InventoryItemStatus;
pub use purchase_order::{PurchaseOrderAction, PurchaseOrderStatus};
pub use stock_transfer::{TransferAction, TransferStatus};
