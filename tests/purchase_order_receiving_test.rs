mod common;

use assert_matches::assert_matches;
use common::{stock_actions, TestContext};
use rust_decimal_macros::dec;
use stockroom::entities::{InventoryItemStatus, PurchaseOrderStatus};
use stockroom::errors::ServiceError;
use stockroom::events::{Event, StockAction};
use stockroom::services::purchase_orders::{
    CreatePurchaseOrderItem, CreatePurchaseOrderRequest, ReceiveBatchRequest, ReceiveLine,
    UnitIdentifier,
};
use uuid::Uuid;

fn units(line_item_id: Uuid, quantity: i32) -> ReceiveLine {
    ReceiveLine {
        line_item_id,
        quantity,
        identifiers: Vec::new(),
        location: None,
    }
}

fn serialised(line_item_id: Uuid, serials: &[&str]) -> ReceiveLine {
    ReceiveLine {
        line_item_id,
        quantity: serials.len() as i32,
        identifiers: serials.iter().map(|s| UnitIdentifier::serial(*s)).collect(),
        location: Some("shelf-a".to_string()),
    }
}

fn batch(lines: Vec<ReceiveLine>) -> ReceiveBatchRequest {
    ReceiveBatchRequest {
        received_by: "store-keeper".to_string(),
        lines,
    }
}

#[tokio::test]
async fn partial_then_full_receipt_then_completion() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "IPH-13-128", 2).await;
    let po = ctx.create_po(branch.id, &[(&variant, 20)]).await;
    let line_id = po.items[0].id;
    let service = &ctx.state.purchase_orders;

    let sent = service.send_purchase_order(po.order.id).await.unwrap();
    assert_eq!(sent.status, PurchaseOrderStatus::Sent);

    let first = service
        .receive_batch(po.order.id, batch(vec![units(line_id, 5)]))
        .await
        .unwrap();
    assert_eq!(first.order.status, PurchaseOrderStatus::PartialReceived);
    assert_eq!(first.items[0].quantity_received, 5);
    let received_date = first.order.received_date.expect("received date set");

    let second = service
        .receive_batch(po.order.id, batch(vec![units(line_id, 15)]))
        .await
        .unwrap();
    assert_eq!(second.order.status, PurchaseOrderStatus::Received);
    assert_eq!(second.items[0].quantity_received, 20);
    assert_eq!(second.order.received_date, Some(received_date));

    let completed = service
        .complete_purchase_order(po.order.id, "manager", Some("all good".to_string()))
        .await
        .unwrap();
    assert_eq!(completed.status, PurchaseOrderStatus::Completed);
    assert_eq!(completed.completed_by.as_deref(), Some("manager"));
    assert_eq!(completed.completion_notes.as_deref(), Some("all good"));
    assert!(completed.completed_at.is_some());

    let items = service.received_items(po.order.id).await.unwrap();
    assert_eq!(items.len(), 20);
    assert!(items.iter().all(|item| item.status == InventoryItemStatus::Available
        && item.variant_id == variant.id
        && item.branch_id == branch.id
        && item.cost_price == dec!(95.50)
        && item.selling_price == dec!(129.50)
        && item.received_by == "store-keeper"));

    assert_eq!(ctx.variant(variant.id).await.quantity, 22);
}

#[tokio::test]
async fn over_receipt_rejects_the_whole_batch() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "SM-A54", 0).await;
    let po = ctx.create_po(branch.id, &[(&variant, 20)]).await;
    let line_id = po.items[0].id;
    let service = &ctx.state.purchase_orders;

    service
        .receive_batch(po.order.id, batch(vec![units(line_id, 18)]))
        .await
        .unwrap();

    assert_matches!(
        service
            .receive_batch(po.order.id, batch(vec![units(line_id, 5)]))
            .await,
        Err(ServiceError::OverReceipt { ordered: 20, received: 18, attempted: 5, line_item_id })
            if line_item_id == line_id
    );

    let details = service.get_purchase_order(po.order.id).await.unwrap();
    assert_eq!(details.items[0].quantity_received, 18);
    assert_eq!(details.order.status, PurchaseOrderStatus::PartialReceived);
    assert_eq!(service.received_items(po.order.id).await.unwrap().len(), 18);
    assert_eq!(ctx.variant(variant.id).await.quantity, 18);
}

#[tokio::test]
async fn repeated_lines_count_together_against_the_order() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "SM-A54", 0).await;
    let po = ctx.create_po(branch.id, &[(&variant, 5)]).await;
    let line_id = po.items[0].id;

    assert_matches!(
        ctx.state
            .purchase_orders
            .receive_batch(po.order.id, batch(vec![units(line_id, 3), units(line_id, 3)]))
            .await,
        Err(ServiceError::OverReceipt { attempted: 6, .. })
    );
    assert_eq!(ctx.variant(variant.id).await.quantity, 0);
}

#[tokio::test]
async fn one_bad_line_blocks_the_good_ones() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let phone = ctx.seed_variant(branch.id, Uuid::new_v4(), "PHONE", 0).await;
    let case = ctx.seed_variant(branch.id, Uuid::new_v4(), "CASE", 0).await;
    let po = ctx.create_po(branch.id, &[(&phone, 4), (&case, 2)]).await;
    let service = &ctx.state.purchase_orders;

    assert_matches!(
        service
            .receive_batch(
                po.order.id,
                batch(vec![units(po.items[0].id, 2), units(po.items[1].id, 3)]),
            )
            .await,
        Err(ServiceError::OverReceipt { .. })
    );

    let details = service.get_purchase_order(po.order.id).await.unwrap();
    assert!(details.items.iter().all(|item| item.quantity_received == 0));
    assert_eq!(details.order.status, PurchaseOrderStatus::Draft);
    assert!(service.received_items(po.order.id).await.unwrap().is_empty());
    assert_eq!(ctx.variant(phone.id).await.quantity, 0);
}

#[tokio::test]
async fn last_line_flips_the_order_to_received() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let phone = ctx.seed_variant(branch.id, Uuid::new_v4(), "PHONE", 0).await;
    let case = ctx.seed_variant(branch.id, Uuid::new_v4(), "CASE", 0).await;
    let po = ctx.create_po(branch.id, &[(&phone, 3), (&case, 2)]).await;
    let service = &ctx.state.purchase_orders;

    let partial = service
        .receive_batch(po.order.id, batch(vec![units(po.items[0].id, 3)]))
        .await
        .unwrap();
    assert_eq!(partial.order.status, PurchaseOrderStatus::PartialReceived);

    let full = service
        .receive_batch(po.order.id, batch(vec![units(po.items[1].id, 2)]))
        .await
        .unwrap();
    assert_eq!(full.order.status, PurchaseOrderStatus::Received);
    assert_eq!(ctx.variant(phone.id).await.quantity, 3);
    assert_eq!(ctx.variant(case.id).await.quantity, 2);
}

#[tokio::test]
async fn serial_numbers_are_captured_per_unit() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "IPH-13-128", 0).await;
    let po = ctx.create_po(branch.id, &[(&variant, 2)]).await;
    let service = &ctx.state.purchase_orders;

    let mut line = serialised(po.items[0].id, &["SN-0001", "SN-0002"]);
    line.identifiers[1].imei = Some("356938035643809".to_string());
    service
        .receive_batch(po.order.id, batch(vec![line]))
        .await
        .unwrap();

    let items = service.received_items(po.order.id).await.unwrap();
    let mut serials: Vec<_> = items
        .iter()
        .filter_map(|item| item.serial_number.clone())
        .collect();
    serials.sort();
    assert_eq!(serials, vec!["SN-0001", "SN-0002"]);
    assert_eq!(
        items.iter().filter(|item| item.imei.is_some()).count(),
        1
    );
    assert!(items
        .iter()
        .all(|item| item.location.as_deref() == Some("shelf-a")));
}

#[tokio::test]
async fn duplicate_identifier_leaves_everything_unchanged() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "IPH-13-128", 0).await;
    let earlier = ctx.create_po(branch.id, &[(&variant, 1)]).await;
    let later = ctx.create_po(branch.id, &[(&variant, 3)]).await;
    let service = &ctx.state.purchase_orders;

    let mut known = serialised(earlier.items[0].id, &["SN-0001"]);
    known.identifiers[0].imei = Some("356938035643809".to_string());
    service
        .receive_batch(earlier.order.id, batch(vec![known]))
        .await
        .unwrap();

    assert_matches!(
        service
            .receive_batch(
                later.order.id,
                batch(vec![serialised(later.items[0].id, &["SN-0009", "SN-0001"])]),
            )
            .await,
        Err(ServiceError::DuplicateIdentifier(value)) if value == "SN-0001"
    );
    assert_matches!(
        service
            .receive_batch(
                later.order.id,
                batch(vec![serialised(later.items[0].id, &["356938035643809"])]),
            )
            .await,
        Err(ServiceError::DuplicateIdentifier(value)) if value == "356938035643809"
    );
    assert_matches!(
        service
            .receive_batch(
                later.order.id,
                batch(vec![serialised(later.items[0].id, &["SN-0005", "SN-0005"])]),
            )
            .await,
        Err(ServiceError::DuplicateIdentifier(_))
    );

    let details = service.get_purchase_order(later.order.id).await.unwrap();
    assert_eq!(details.items[0].quantity_received, 0);
    assert_eq!(details.order.status, PurchaseOrderStatus::Draft);
    assert!(service.received_items(later.order.id).await.unwrap().is_empty());
    assert_eq!(ctx.variant(variant.id).await.quantity, 1);
}

#[tokio::test]
async fn identifier_count_must_match_units() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "IPH-13-128", 0).await;
    let po = ctx.create_po(branch.id, &[(&variant, 5)]).await;

    let mut line = serialised(po.items[0].id, &["SN-1", "SN-2"]);
    line.quantity = 3;

    assert_matches!(
        ctx.state
            .purchase_orders
            .receive_batch(po.order.id, batch(vec![line]))
            .await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn completion_while_short_names_the_remaining_units() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "SM-A54", 0).await;
    let po = ctx.create_po(branch.id, &[(&variant, 20)]).await;
    let service = &ctx.state.purchase_orders;

    service
        .receive_batch(po.order.id, batch(vec![units(po.items[0].id, 18)]))
        .await
        .unwrap();

    let err = service
        .complete_purchase_order(po.order.id, "manager", None)
        .await
        .unwrap_err();
    assert_matches!(
        err,
        ServiceError::InvalidTransition { detail: Some(ref d), .. }
            if d.starts_with("2 units remaining") && d.contains(&po.items[0].id.to_string())
    );
    assert_eq!(
        service.get_purchase_order(po.order.id).await.unwrap().order.status,
        PurchaseOrderStatus::PartialReceived
    );
}

#[tokio::test]
async fn closed_orders_refuse_receipts() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "SM-A54", 0).await;
    let service = &ctx.state.purchase_orders;

    let done = ctx.create_po(branch.id, &[(&variant, 1)]).await;
    service
        .receive_batch(done.order.id, batch(vec![units(done.items[0].id, 1)]))
        .await
        .unwrap();
    service
        .complete_purchase_order(done.order.id, "manager", None)
        .await
        .unwrap();
    assert_matches!(
        service
            .receive_batch(done.order.id, batch(vec![units(done.items[0].id, 1)]))
            .await,
        Err(ServiceError::InvalidTransition { .. })
    );
    assert_matches!(
        service
            .complete_purchase_order(done.order.id, "manager", None)
            .await,
        Err(ServiceError::InvalidTransition { .. })
    );

    let cancelled = ctx.create_po(branch.id, &[(&variant, 1)]).await;
    service
        .cancel_purchase_order(cancelled.order.id, None)
        .await
        .unwrap();
    assert_matches!(
        service
            .receive_batch(cancelled.order.id, batch(vec![units(cancelled.items[0].id, 1)]))
            .await,
        Err(ServiceError::InvalidTransition { .. })
    );

    assert_eq!(ctx.variant(variant.id).await.quantity, 1);
}

#[tokio::test]
async fn send_and_cancel_follow_the_order_lifecycle() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "SM-A54", 0).await;
    let service = &ctx.state.purchase_orders;

    let po = ctx.create_po(branch.id, &[(&variant, 4)]).await;
    service.send_purchase_order(po.order.id).await.unwrap();
    assert_matches!(
        service.send_purchase_order(po.order.id).await,
        Err(ServiceError::InvalidTransition { .. })
    );
    let cancelled = service
        .cancel_purchase_order(po.order.id, Some("supplier out of stock".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, PurchaseOrderStatus::Cancelled);
    assert_eq!(
        cancelled.completion_notes.as_deref(),
        Some("supplier out of stock")
    );

    let started = ctx.create_po(branch.id, &[(&variant, 4)]).await;
    service
        .receive_batch(started.order.id, batch(vec![units(started.items[0].id, 1)]))
        .await
        .unwrap();
    assert_matches!(
        service.cancel_purchase_order(started.order.id, None).await,
        Err(ServiceError::InvalidTransition { .. })
    );
}

#[tokio::test]
async fn line_items_must_belong_to_the_order() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "SM-A54", 0).await;
    let first = ctx.create_po(branch.id, &[(&variant, 4)]).await;
    let second = ctx.create_po(branch.id, &[(&variant, 4)]).await;

    assert_matches!(
        ctx.state
            .purchase_orders
            .receive_batch(first.order.id, batch(vec![units(second.items[0].id, 1)]))
            .await,
        Err(ServiceError::NotFound(_))
    );
    assert_matches!(
        ctx.state
            .purchase_orders
            .receive_batch(Uuid::new_v4(), batch(vec![units(first.items[0].id, 1)]))
            .await,
        Err(ServiceError::NotFound(_))
    );
}

#[tokio::test]
async fn creation_validates_lines_and_totals() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let phone = ctx.seed_variant(branch.id, Uuid::new_v4(), "PHONE", 0).await;
    let case = ctx.seed_variant(branch.id, Uuid::new_v4(), "CASE", 0).await;
    let service = &ctx.state.purchase_orders;

    let base = CreatePurchaseOrderRequest {
        order_number: "PO-2024-0001".to_string(),
        supplier_id: Uuid::new_v4(),
        branch_id: branch.id,
        created_by: "buyer".to_string(),
        notes: Some("quarterly restock".to_string()),
        items: vec![
            CreatePurchaseOrderItem {
                product_id: phone.product_id,
                variant_id: phone.id,
                quantity_ordered: 3,
                unit_cost: dec!(250.00),
            },
            CreatePurchaseOrderItem {
                product_id: case.product_id,
                variant_id: case.id,
                quantity_ordered: 10,
                unit_cost: dec!(4.25),
            },
        ],
    };

    let mut empty = base.clone();
    empty.items.clear();
    assert_matches!(
        service.create_purchase_order(empty).await,
        Err(ServiceError::ValidationError(_))
    );

    let mut negative = base.clone();
    negative.items[1].unit_cost = dec!(-1);
    assert_matches!(
        service.create_purchase_order(negative).await,
        Err(ServiceError::ValidationError(_))
    );

    let mut mismatched = base.clone();
    mismatched.items[0].product_id = Uuid::new_v4();
    assert_matches!(
        service.create_purchase_order(mismatched).await,
        Err(ServiceError::ValidationError(_))
    );

    let created = service.create_purchase_order(base.clone()).await.unwrap();
    assert_eq!(created.order.status, PurchaseOrderStatus::Draft);
    assert_eq!(created.order.total_amount, dec!(792.50));
    assert_eq!(created.items.len(), 2);

    assert_matches!(
        service.create_purchase_order(base).await,
        Err(ServiceError::ValidationError(_))
    );
}

#[tokio::test]
async fn summary_tracks_progress() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let phone = ctx.seed_variant(branch.id, Uuid::new_v4(), "PHONE", 0).await;
    let case = ctx.seed_variant(branch.id, Uuid::new_v4(), "CASE", 0).await;
    let po = ctx.create_po(branch.id, &[(&phone, 6), (&case, 2)]).await;
    let service = &ctx.state.purchase_orders;

    service
        .receive_batch(
            po.order.id,
            batch(vec![units(po.items[0].id, 2), units(po.items[1].id, 2)]),
        )
        .await
        .unwrap();

    let summary = service.receive_summary(po.order.id).await.unwrap();
    assert_eq!(summary.status, PurchaseOrderStatus::PartialReceived);
    assert_eq!(summary.total_items, 2);
    assert_eq!(summary.completed_items, 1);
    assert_eq!(summary.total_ordered, 8);
    assert_eq!(summary.total_received, 4);
    assert_eq!(summary.completion_percentage, 50.0);
    assert!(!summary.can_complete);

    service
        .receive_batch(po.order.id, batch(vec![units(po.items[0].id, 4)]))
        .await
        .unwrap();
    let summary = service.receive_summary(po.order.id).await.unwrap();
    assert!(summary.can_complete);
    assert_eq!(summary.completion_percentage, 100.0);
}

#[tokio::test]
async fn receiving_publishes_stock_and_status_events() {
    let mut ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "SM-A54", 0).await;
    let po = ctx.create_po(branch.id, &[(&variant, 4)]).await;

    ctx.state
        .purchase_orders
        .receive_batch(po.order.id, batch(vec![units(po.items[0].id, 4)]))
        .await
        .unwrap();

    let events = ctx.drain_events();
    assert_eq!(stock_actions(&events), vec![StockAction::PoReceived]);
    assert!(events.iter().any(|event| matches!(
        event,
        Event::StockUpdated(update)
            if update.purchase_order_id == Some(po.order.id) && update.quantity == 4
    )));
    assert!(events.iter().any(|event| matches!(
        event,
        Event::PurchaseOrderStatusChanged {
            old_status: PurchaseOrderStatus::Draft,
            new_status: PurchaseOrderStatus::Received,
            ..
        }
    )));
}

#[tokio::test]
async fn parent_variants_cannot_be_ordered() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let parent = ctx.seed_variant(branch.id, Uuid::new_v4(), "IPH-15", 0).await;
    ctx.seed_child(&parent, "IPH-15-BLK", 3, 1).await;

    let result = ctx
        .state
        .purchase_orders
        .create_purchase_order(CreatePurchaseOrderRequest {
            order_number: "PO-PARENT".to_string(),
            supplier_id: Uuid::new_v4(),
            branch_id: branch.id,
            created_by: "buyer".to_string(),
            notes: None,
            items: vec![CreatePurchaseOrderItem {
                product_id: parent.product_id,
                variant_id: parent.id,
                quantity_ordered: 5,
                unit_cost: dec!(95.50),
            }],
        })
        .await;

    assert_matches!(result, Err(ServiceError::ValidationError(_)));
    assert_eq!(ctx.state.ledger.get_available_stock(parent.id).await.unwrap(), 3);
}

#[tokio::test]
async fn receipt_onto_a_variant_that_gained_children_is_refused() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "IPH-15", 0).await;
    let po = ctx.create_po(branch.id, &[(&variant, 5)]).await;
    ctx.seed_child(&variant, "IPH-15-BLK", 3, 1).await;
    let service = &ctx.state.purchase_orders;

    assert_matches!(
        service
            .receive_batch(po.order.id, batch(vec![units(po.items[0].id, 5)]))
            .await,
        Err(ServiceError::ValidationError(_))
    );

    let details = service.get_purchase_order(po.order.id).await.unwrap();
    assert_eq!(details.items[0].quantity_received, 0);
    assert_eq!(details.order.status, PurchaseOrderStatus::Draft);
    assert!(service.received_items(po.order.id).await.unwrap().is_empty());
    assert_eq!(ctx.variant(variant.id).await.quantity, 0);
    assert_eq!(ctx.state.ledger.get_available_stock(variant.id).await.unwrap(), 3);
}

#[tokio::test]
async fn large_serialised_receipt_is_written_in_full() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "CABLE-USB-C", 0).await;
    let po = ctx.create_po(branch.id, &[(&variant, 2500)]).await;
    let service = &ctx.state.purchase_orders;

    let line = ReceiveLine {
        line_item_id: po.items[0].id,
        quantity: 2500,
        identifiers: (0..2500)
            .map(|n| UnitIdentifier::serial(format!("SN-{n:05}")))
            .collect(),
        location: Some("bulk-store".to_string()),
    };
    let details = service
        .receive_batch(po.order.id, batch(vec![line]))
        .await
        .unwrap();

    assert_eq!(details.order.status, PurchaseOrderStatus::Received);
    assert_eq!(details.items[0].quantity_received, 2500);
    assert_eq!(ctx.variant(variant.id).await.quantity, 2500);
    assert_eq!(service.received_items(po.order.id).await.unwrap().len(), 2500);

    let completed = service
        .complete_purchase_order(po.order.id, "manager", None)
        .await
        .unwrap();
    assert_eq!(completed.status, PurchaseOrderStatus::Completed);
}

#[tokio::test]
async fn quantities_past_i32_are_an_over_receipt() {
    let ctx = TestContext::new().await;
    let branch = ctx.seed_branch("DAR").await;
    let variant = ctx.seed_variant(branch.id, Uuid::new_v4(), "SM-A54", 0).await;
    let po = ctx.create_po(branch.id, &[(&variant, 5)]).await;
    let line_id = po.items[0].id;
    let service = &ctx.state.purchase_orders;

    assert_matches!(
        service
            .receive_batch(
                po.order.id,
                batch(vec![units(line_id, i32::MAX), units(line_id, 2)]),
            )
            .await,
        Err(ServiceError::OverReceipt { attempted, .. }) if attempted == i64::from(i32::MAX) + 2
    );

    let details = service.get_purchase_order(po.order.id).await.unwrap();
    assert_eq!(details.items[0].quantity_received, 0);
    assert_eq!(ctx.variant(variant.id).await.quantity, 0);
}
