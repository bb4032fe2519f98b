// Inventory ledger and reservation engine
pub mod inventory_ledger;

// Workflows built on the ledger
pub mod purchase_orders;
pub mod stock_transfers;

pub use inventory_ledger::{InventoryLedger, StockLevel};
pub use purchase_orders::PurchaseOrderService;
pub use stock_transfers::StockTransferService;
