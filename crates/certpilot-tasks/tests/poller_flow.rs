//! Poller and worker behavior against an in-memory database.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;

use certpilot_core::{AppSettings, NullTaskScheduler, TaskScheduler};
use certpilot_database::test_utils::setup_test_db;
use certpilot_database::DbConnection;
use certpilot_email::MockEmailProvider;
use certpilot_entities::{certs, domain_validation_records, orders, products, tasks, users};
use certpilot_kv::MemoryCounterStore;
use certpilot_orders::{MockVerifyClient, OrderService};
use certpilot_tasks::{TaskService, TaskWorker, ValidationPoller};
use certpilot_vendors::VendorRegistry;

async fn seed_processing_order(db: &Arc<DbConnection>) -> (orders::Model, certs::Model) {
    let user = users::ActiveModel {
        username: Set("poll-user".to_string()),
        email: Set(Some("poll@example.com".to_string())),
        balance: Set(Decimal::ZERO),
        credit_limit: Set(Decimal::ZERO),
        status: Set(1),
        ..Default::default()
    }
    .insert(db.as_ref())
    .await
    .unwrap();

    let product = products::ActiveModel {
        code: Set("poll-dv".to_string()),
        name: Set("DV".to_string()),
        api_id: Set("1".to_string()),
        source: Set("racent".to_string()),
        brand: Set("sectigo".to_string()),
        ca: Set("sectigo".to_string()),
        validation_type: Set("dv".to_string()),
        common_name_types: Set(json!(["standard"])),
        alternative_name_types: Set(json!(["standard"])),
        validation_methods: Set(json!(["cname"])),
        periods: Set(json!([12])),
        encryption_alg: Set(json!(["rsa"])),
        signature_digest_alg: Set(json!(["sha256"])),
        standard_min: Set(1),
        standard_max: Set(1),
        wildcard_min: Set(0),
        wildcard_max: Set(0),
        total_min: Set(1),
        total_max: Set(1),
        add_san: Set(false),
        replace_san: Set(false),
        reissue: Set(true),
        renew: Set(true),
        reuse_csr: Set(false),
        gift_root_domain: Set(false),
        refund_period: Set(30),
        cost: Set(json!({"price": {"12": "10.00"}})),
        weight: Set(0),
        status: Set(1),
        ..Default::default()
    }
    .insert(db.as_ref())
    .await
    .unwrap();

    let order = orders::ActiveModel {
        user_id: Set(user.id),
        product_id: Set(product.id),
        brand: Set("sectigo".to_string()),
        plus: Set(true),
        period: Set(12),
        amount: Set(Decimal::ZERO),
        purchased_standard_count: Set(0),
        purchased_wildcard_count: Set(0),
        ..Default::default()
    }
    .insert(db.as_ref())
    .await
    .unwrap();

    let cert = certs::ActiveModel {
        order_id: Set(order.id),
        action: Set("new".to_string()),
        channel: Set("api".to_string()),
        refer_id: Set(certpilot_core::generate_refer_id()),
        amount: Set(Decimal::ZERO),
        csr: Set("-----BEGIN CERTIFICATE REQUEST-----\nMA==\n-----END CERTIFICATE REQUEST-----".to_string()),
        csr_md5: Set(String::new()),
        common_name: Set("example.com".to_string()),
        alternative_names: Set("example.com".to_string()),
        standard_count: Set(1),
        wildcard_count: Set(0),
        dcv: Set(Some(json!({
            "method": "cname",
            "dns": {"host": "_abc", "type": "CNAME", "value": "x.y.sectigo.com"}
        }))),
        validation: Set(Some(json!([
            {"domain": "example.com", "method": "cname", "host": "_abc",
             "value": "x.y.sectigo.com", "verified": false}
        ]))),
        status: Set("processing".to_string()),
        ..Default::default()
    }
    .insert(db.as_ref())
    .await
    .unwrap();

    let mut order_update: orders::ActiveModel = order.clone().into();
    order_update.latest_cert_id = Set(Some(cert.id));
    let order = order_update.update(db.as_ref()).await.unwrap();

    (order, cert)
}

#[tokio::test]
async fn poller_creates_record_and_schedules_next_node() {
    let db = setup_test_db().await;
    let (order, _cert) = seed_processing_order(&db).await;
    let (task_service, _receiver) = TaskService::create(db.clone(), 16);

    let poller = ValidationPoller::new(
        db.clone(),
        task_service.clone(),
        Arc::new(MockVerifyClient::failing("records not published")),
    );

    // First pass creates the cadence record with the first check a minute
    // out; no task is scheduled yet.
    poller.run_once().await.unwrap();
    let record = domain_validation_records::Entity::find()
        .filter(domain_validation_records::Column::OrderId.eq(order.id))
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert!(record.next_check_at > Utc::now());
    assert_eq!(tasks::Entity::find().all(db.as_ref()).await.unwrap().len(), 0);
}

#[tokio::test]
async fn poller_advances_along_the_node_table() {
    let db = setup_test_db().await;
    let (order, _cert) = seed_processing_order(&db).await;
    let (task_service, _receiver) = TaskService::create(db.clone(), 16);

    // Record created four minutes ago and due now.
    let created_at = Utc::now() - Duration::minutes(4);
    domain_validation_records::ActiveModel {
        order_id: Set(order.id),
        last_check_at: Set(created_at),
        next_check_at: Set(created_at + Duration::minutes(3)),
        created_at: Set(created_at),
        updated_at: Set(created_at),
        ..Default::default()
    }
    .insert(db.as_ref())
    .await
    .unwrap();

    let poller = ValidationPoller::new(
        db.clone(),
        task_service.clone(),
        Arc::new(MockVerifyClient::passing()),
    );
    poller.run_once().await.unwrap();

    // elapsed = 4 minutes, so the next node is 6: next_check = T + 6min.
    let record = domain_validation_records::Entity::find()
        .filter(domain_validation_records::Column::OrderId.eq(order.id))
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        record.next_check_at,
        record.created_at + Duration::minutes(6)
    );

    // Records verified: a revalidate task was scheduled.
    let queued = tasks::Entity::find().all(db.as_ref()).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].action, "revalidate");
    assert_eq!(queued[0].task_id, order.id);
}

#[tokio::test]
async fn poller_stops_after_forty_eight_hours() {
    let db = setup_test_db().await;
    let (order, _cert) = seed_processing_order(&db).await;
    let (task_service, _receiver) = TaskService::create(db.clone(), 16);

    let created_at = Utc::now() - Duration::hours(49);
    domain_validation_records::ActiveModel {
        order_id: Set(order.id),
        last_check_at: Set(created_at),
        next_check_at: Set(created_at + Duration::minutes(3)),
        created_at: Set(created_at),
        updated_at: Set(created_at),
        ..Default::default()
    }
    .insert(db.as_ref())
    .await
    .unwrap();

    let poller = ValidationPoller::new(
        db.clone(),
        task_service.clone(),
        Arc::new(MockVerifyClient::passing()),
    );
    poller.run_once().await.unwrap();

    assert_eq!(tasks::Entity::find().all(db.as_ref()).await.unwrap().len(), 0);
}

#[tokio::test]
async fn poller_schedules_sync_for_approving_certs() {
    let db = setup_test_db().await;
    let (order, cert) = seed_processing_order(&db).await;
    let (task_service, _receiver) = TaskService::create(db.clone(), 16);

    let mut update: certs::ActiveModel = cert.into();
    update.status = Set("approving".to_string());
    update.update(db.as_ref()).await.unwrap();

    let created_at = Utc::now() - Duration::minutes(4);
    domain_validation_records::ActiveModel {
        order_id: Set(order.id),
        last_check_at: Set(created_at),
        next_check_at: Set(created_at + Duration::minutes(3)),
        created_at: Set(created_at),
        updated_at: Set(created_at),
        ..Default::default()
    }
    .insert(db.as_ref())
    .await
    .unwrap();

    let poller = ValidationPoller::new(
        db.clone(),
        task_service.clone(),
        Arc::new(MockVerifyClient::passing()),
    );
    poller.run_once().await.unwrap();

    let queued = tasks::Entity::find().all(db.as_ref()).await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].action, "sync");
}

#[tokio::test]
async fn worker_records_business_failure_without_retry() {
    let db = setup_test_db().await;
    let (order, _cert) = seed_processing_order(&db).await;

    let (task_service, _receiver) = TaskService::create(db.clone(), 16);
    let orders_service = Arc::new(OrderService::new(
        db.clone(),
        Arc::new(VendorRegistry::empty()),
        Arc::new(NullTaskScheduler),
        Arc::new(MemoryCounterStore::new()),
        Arc::new(MockVerifyClient::passing()),
        Arc::new(MockEmailProvider::new()),
        AppSettings::default(),
    ));

    let worker = TaskWorker::new(
        db.clone(),
        orders_service,
        task_service.clone(),
        Arc::new(MockEmailProvider::new()),
        AppSettings::default(),
    );

    // The cert has no vendor reference, so a sync is rejected as a
    // business outcome: the task finalizes as failed, no retry.
    task_service.create_task(&[order.id], certpilot_core::TaskAction::Sync, 0).await.unwrap();
    let row = tasks::Entity::find().one(db.as_ref()).await.unwrap().unwrap();

    // Make the row due immediately.
    let mut update: tasks::ActiveModel = row.clone().into();
    update.started_at = Set(Some(Utc::now() - Duration::seconds(1)));
    update.update(db.as_ref()).await.unwrap();

    worker.execute(row.id).await.unwrap();

    let row = tasks::Entity::find_by_id(row.id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "failed");
    assert_eq!(row.attempts, 1);
    let result = row.result.unwrap();
    assert_eq!(result["code"], 0);
    assert!(result["msg"].as_str().unwrap().contains("vendor reference"));
    assert!(result.get("retrying").is_none());
}

#[tokio::test]
async fn worker_skips_rows_that_are_not_due() {
    let db = setup_test_db().await;
    let (order, _cert) = seed_processing_order(&db).await;

    let (task_service, _receiver) = TaskService::create(db.clone(), 16);
    let orders_service = Arc::new(OrderService::new(
        db.clone(),
        Arc::new(VendorRegistry::empty()),
        Arc::new(NullTaskScheduler),
        Arc::new(MemoryCounterStore::new()),
        Arc::new(MockVerifyClient::passing()),
        Arc::new(MockEmailProvider::new()),
        AppSettings::default(),
    ));
    let worker = TaskWorker::new(
        db.clone(),
        orders_service,
        task_service.clone(),
        Arc::new(MockEmailProvider::new()),
        AppSettings::default(),
    );

    // Scheduled two minutes out: not claimable yet.
    task_service
        .create_task(&[order.id], certpilot_core::TaskAction::Sync, 120)
        .await
        .unwrap();
    let row = tasks::Entity::find().one(db.as_ref()).await.unwrap().unwrap();

    worker.execute(row.id).await.unwrap();

    let row = tasks::Entity::find_by_id(row.id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "executing");
    assert_eq!(row.attempts, 0);
}
