use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::{de::DeserializeOwned, Serialize};
use stockroom::{
    config,
    entities::{inventory_item, purchase_order, stock_transfer, TransferStatus},
    services::{
        purchase_orders::{CreatePurchaseOrderRequest, PurchaseOrderDetails, ReceiveBatchRequest},
        stock_transfers::{CreateTransferRequest, TransferFilter},
        StockLevel,
    },
    AppState,
};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load_config().context("failed to load application config")?;
    config::init_tracing(config.log_level(), config.log_json);
    let (state, _event_loop) = AppState::build(config)
        .await
        .context("failed to initialise stockroom")?;

    match cli.command {
        Commands::Migrate => {
            stockroom::db::run_migrations(&state.db)
                .await
                .context("failed to apply migrations")?;
            println!("Migrations applied");
        }
        Commands::Stock(command) => handle_stock_command(&state, command, cli.json).await?,
        Commands::Transfers(command) => {
            handle_transfers_command(&state, command, cli.json).await?
        }
        Commands::Po(command) => handle_po_command(&state, command, cli.json).await?,
    }

    Ok(())
}

#[derive(Parser)]
#[command(
    name = "stockroom",
    about = "Operator CLI for branch stock, transfers and purchase order receiving",
    version
)]
struct Cli {
    #[arg(
        long,
        global = true,
        action = ArgAction::SetTrue,
        help = "Render command output as pretty JSON"
    )]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply pending schema migrations
    Migrate,
    #[command(subcommand)]
    Stock(StockCommands),
    #[command(subcommand)]
    Transfers(TransferCommands),
    #[command(subcommand)]
    Po(PurchaseOrderCommands),
}

#[derive(Subcommand)]
enum StockCommands {
    /// Show on-hand, reserved and available stock for a variant
    Show { variant_id: Uuid },
    Reserve(QuantityArgs),
    Release(QuantityArgs),
}

#[derive(Args)]
struct QuantityArgs {
    variant_id: Uuid,
    quantity: i32,
}

#[derive(Subcommand)]
enum TransferCommands {
    Create(CreateTransferArgs),
    Approve {
        transfer_id: Uuid,
        #[arg(long)]
        by: String,
    },
    Reject {
        transfer_id: Uuid,
        #[arg(long)]
        by: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Mark an approved transfer as shipped
    Ship { transfer_id: Uuid },
    Complete {
        transfer_id: Uuid,
        #[arg(long)]
        by: Option<String>,
    },
    Cancel {
        transfer_id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
    Show { transfer_id: Uuid },
    List {
        #[arg(long, help = "Transfers leaving or arriving at this branch")]
        branch: Option<Uuid>,
        #[arg(long)]
        status: Option<TransferStatus>,
        #[arg(long)]
        limit: Option<u64>,
    },
    Stats {
        #[arg(long)]
        branch: Option<Uuid>,
    },
    /// Transfers that touched a variant
    History { variant_id: Uuid },
}

#[derive(Args)]
struct CreateTransferArgs {
    #[arg(long)]
    from: Uuid,
    #[arg(long)]
    to: Uuid,
    #[arg(long)]
    variant: Uuid,
    #[arg(long)]
    quantity: i32,
    #[arg(long)]
    requested_by: String,
    #[arg(long)]
    notes: Option<String>,
}

#[derive(Subcommand)]
enum PurchaseOrderCommands {
    /// Create a draft purchase order from a JSON file
    Create {
        #[arg(long)]
        file: PathBuf,
    },
    Send { po_id: Uuid },
    Cancel {
        po_id: Uuid,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Receive a batch described by a JSON file
    Receive {
        po_id: Uuid,
        #[arg(long)]
        file: PathBuf,
    },
    Complete {
        po_id: Uuid,
        #[arg(long)]
        by: String,
        #[arg(long)]
        notes: Option<String>,
    },
    Show { po_id: Uuid },
    Summary { po_id: Uuid },
    Items { po_id: Uuid },
}

async fn handle_stock_command(state: &AppState, command: StockCommands, json: bool) -> Result<()> {
    match command {
        StockCommands::Show { variant_id } => {
            let level = state
                .ledger
                .stock_level(variant_id)
                .await
                .context("failed to read stock level")?;
            if json {
                print_json(&level)?;
            } else {
                render_stock_level(&level);
            }
        }
        StockCommands::Reserve(args) => {
            let holder = state
                .ledger
                .reserve(args.variant_id, args.quantity)
                .await
                .context("failed to reserve stock")?;
            if json {
                print_json(&serde_json::json!({ "variant_id": holder, "reserved": args.quantity }))?;
            } else {
                println!("Reserved {} on variant {}", args.quantity, holder);
            }
        }
        StockCommands::Release(args) => {
            state
                .ledger
                .release(args.variant_id, args.quantity)
                .await
                .context("failed to release stock")?;
            if json {
                print_json(
                    &serde_json::json!({ "variant_id": args.variant_id, "released": args.quantity }),
                )?;
            } else {
                println!("Released {} on variant {}", args.quantity, args.variant_id);
            }
        }
    }
    Ok(())
}

async fn handle_transfers_command(
    state: &AppState,
    command: TransferCommands,
    json: bool,
) -> Result<()> {
    let service = &state.transfers;

    let transfer = match command {
        TransferCommands::Create(args) => service
            .create_transfer(CreateTransferRequest {
                from_branch_id: args.from,
                to_branch_id: args.to,
                variant_id: args.variant,
                quantity: args.quantity,
                requested_by: args.requested_by,
                notes: args.notes,
            })
            .await
            .context("failed to create transfer")?,
        TransferCommands::Approve { transfer_id, by } => service
            .approve_transfer(transfer_id, &by)
            .await
            .context("failed to approve transfer")?,
        TransferCommands::Reject {
            transfer_id,
            by,
            reason,
        } => service
            .reject_transfer(transfer_id, &by, reason)
            .await
            .context("failed to reject transfer")?,
        TransferCommands::Ship { transfer_id } => service
            .mark_in_transit(transfer_id)
            .await
            .context("failed to mark transfer in transit")?,
        TransferCommands::Complete { transfer_id, by } => service
            .complete_transfer(transfer_id, by)
            .await
            .context("failed to complete transfer")?,
        TransferCommands::Cancel {
            transfer_id,
            reason,
        } => service
            .cancel_transfer(transfer_id, reason)
            .await
            .context("failed to cancel transfer")?,
        TransferCommands::Show { transfer_id } => service
            .get_transfer(transfer_id)
            .await
            .context("failed to load transfer")?,
        TransferCommands::List {
            branch,
            status,
            limit,
        } => {
            let transfers = service
                .list_transfers(TransferFilter {
                    branch_id: branch,
                    status,
                    limit,
                })
                .await
                .context("failed to list transfers")?;
            return render_transfers(&transfers, json);
        }
        TransferCommands::Stats { branch } => {
            let stats = service
                .transfer_stats(branch)
                .await
                .context("failed to compute transfer stats")?;
            if json {
                print_json(&stats)?;
            } else {
                println!(
                    "{} transfers ({} units): {} pending, {} approved, {} in transit, {} completed, {} rejected, {} cancelled",
                    stats.total,
                    stats.total_quantity,
                    stats.pending,
                    stats.approved,
                    stats.in_transit,
                    stats.completed,
                    stats.rejected,
                    stats.cancelled
                );
            }
            return Ok(());
        }
        TransferCommands::History { variant_id } => {
            let transfers = service
                .variant_transfer_history(variant_id)
                .await
                .context("failed to load transfer history")?;
            return render_transfers(&transfers, json);
        }
    };

    if json {
        print_json(&transfer)
    } else {
        render_transfer(&transfer);
        Ok(())
    }
}

async fn handle_po_command(
    state: &AppState,
    command: PurchaseOrderCommands,
    json: bool,
) -> Result<()> {
    let service = &state.purchase_orders;

    match command {
        PurchaseOrderCommands::Create { file } => {
            let request: CreatePurchaseOrderRequest = read_json(&file)?;
            let details = service
                .create_purchase_order(request)
                .await
                .context("failed to create purchase order")?;
            output_details(&details, json)
        }
        PurchaseOrderCommands::Send { po_id } => {
            let order = service
                .send_purchase_order(po_id)
                .await
                .context("failed to send purchase order")?;
            output_order(&order, json)
        }
        PurchaseOrderCommands::Cancel { po_id, reason } => {
            let order = service
                .cancel_purchase_order(po_id, reason)
                .await
                .context("failed to cancel purchase order")?;
            output_order(&order, json)
        }
        PurchaseOrderCommands::Receive { po_id, file } => {
            let request: ReceiveBatchRequest = read_json(&file)?;
            let details = service
                .receive_batch(po_id, request)
                .await
                .context("failed to receive batch")?;
            output_details(&details, json)
        }
        PurchaseOrderCommands::Complete { po_id, by, notes } => {
            let order = service
                .complete_purchase_order(po_id, &by, notes)
                .await
                .context("failed to complete purchase order")?;
            output_order(&order, json)
        }
        PurchaseOrderCommands::Show { po_id } => {
            let details = service
                .get_purchase_order(po_id)
                .await
                .context("failed to load purchase order")?;
            output_details(&details, json)
        }
        PurchaseOrderCommands::Summary { po_id } => {
            let summary = service
                .receive_summary(po_id)
                .await
                .context("failed to summarise purchase order")?;
            if json {
                return print_json(&summary);
            }
            println!(
                "Purchase order {} • {} • {}/{} units ({:.2}%) • {}/{} lines complete{}",
                summary.purchase_order_id,
                summary.status,
                summary.total_received,
                summary.total_ordered,
                summary.completion_percentage,
                summary.completed_items,
                summary.total_items,
                if summary.can_complete {
                    " • ready to complete"
                } else {
                    ""
                }
            );
            for line in &summary.lines {
                println!(
                    "  - line {} • variant {} • {}/{} received, {} remaining",
                    line.line_item_id, line.variant_id, line.received, line.ordered, line.remaining
                );
            }
            Ok(())
        }
        PurchaseOrderCommands::Items { po_id } => {
            let items = service
                .received_items(po_id)
                .await
                .context("failed to load received items")?;
            if json {
                return print_json(&items);
            }
            if items.is_empty() {
                println!("No units received yet");
            }
            for item in &items {
                render_inventory_item(item);
            }
            Ok(())
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &PathBuf) -> Result<T> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("failed to parse {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_stock_level(level: &StockLevel) {
    println!(
        "Variant {}{} • on hand {} • reserved {} • available {}",
        level.variant_id,
        if level.is_parent { " (parent)" } else { "" },
        level.on_hand,
        level.reserved,
        level.available
    );
}

fn render_transfer(transfer: &stock_transfer::Model) {
    println!(
        "- Transfer {} • {} → {} • variant {} × {} • {}",
        transfer.id,
        transfer.from_branch_id,
        transfer.to_branch_id,
        transfer.variant_id,
        transfer.quantity,
        transfer.status
    );
}

fn render_transfers(transfers: &[stock_transfer::Model], json: bool) -> Result<()> {
    if json {
        return print_json(&transfers);
    }
    if transfers.is_empty() {
        println!("No transfers found");
    }
    for transfer in transfers {
        render_transfer(transfer);
    }
    Ok(())
}

fn output_order(order: &purchase_order::Model, json: bool) -> Result<()> {
    if json {
        return print_json(order);
    }
    println!(
        "- Purchase order {} ({}) • status {} • total {}",
        order.order_number, order.id, order.status, order.total_amount
    );
    Ok(())
}

fn output_details(details: &PurchaseOrderDetails, json: bool) -> Result<()> {
    if json {
        return print_json(details);
    }
    output_order(&details.order, false)?;
    for item in &details.items {
        println!(
            "  - line {} • variant {} • {}/{} received @ {}",
            item.id, item.variant_id, item.quantity_received, item.quantity_ordered, item.unit_cost
        );
    }
    Ok(())
}

fn render_inventory_item(item: &inventory_item::Model) {
    println!(
        "- Unit {} • variant {} • serial {} • imei {} • {}",
        item.id,
        item.variant_id,
        item.serial_number.as_deref().unwrap_or("-"),
        item.imei.as_deref().unwrap_or("-"),
        item.status
    );
}
