//! End-to-end orchestrator tests against an in-memory database: charge
//! atomicity, the credit floor, submission validation and CSR dedup.

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use serde_json::json;

use certpilot_core::{AppSettings, CertKind, Channel, NullTaskScheduler, ValidationMethod};
use certpilot_database::test_utils::setup_test_db;
use certpilot_database::DbConnection;
use certpilot_email::MockEmailProvider;
use certpilot_entities::{certs, orders, products, transactions, users};
use certpilot_kv::MemoryCounterStore;
use certpilot_orders::{Actor, MockVerifyClient, OrderError, OrderService, SubmissionParams};
use certpilot_vendors::VendorRegistry;

async fn service(db: Arc<DbConnection>) -> OrderService {
    OrderService::new(
        db,
        Arc::new(VendorRegistry::empty()),
        Arc::new(NullTaskScheduler),
        Arc::new(MemoryCounterStore::new()),
        Arc::new(MockVerifyClient::passing()),
        Arc::new(MockEmailProvider::new()),
        AppSettings::default(),
    )
}

async fn seed_user(db: &DbConnection, balance: &str, credit_limit: &str) -> users::Model {
    users::ActiveModel {
        username: Set(format!("user-{}", certpilot_core::random_alnum(6))),
        email: Set(Some("user@example.com".to_string())),
        balance: Set(Decimal::from_str(balance).unwrap()),
        credit_limit: Set(Decimal::from_str(credit_limit).unwrap()),
        status: Set(1),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

async fn seed_product(db: &DbConnection, reuse_csr: bool) -> products::Model {
    products::ActiveModel {
        code: Set(format!("dv-{}", certpilot_core::random_alnum(6))),
        name: Set("DV Multi".to_string()),
        api_id: Set("100".to_string()),
        source: Set("racent".to_string()),
        brand: Set("sectigo".to_string()),
        ca: Set("sectigo".to_string()),
        validation_type: Set("dv".to_string()),
        common_name_types: Set(json!(["standard", "wildcard"])),
        alternative_name_types: Set(json!(["standard", "wildcard"])),
        validation_methods: Set(json!(["cname", "txt", "http", "https", "admin"])),
        periods: Set(json!([12, 24])),
        encryption_alg: Set(json!(["rsa", "ecdsa"])),
        signature_digest_alg: Set(json!(["sha256"])),
        standard_min: Set(1),
        standard_max: Set(2),
        wildcard_min: Set(0),
        wildcard_max: Set(1),
        total_min: Set(1),
        total_max: Set(3),
        add_san: Set(true),
        replace_san: Set(true),
        reissue: Set(true),
        renew: Set(true),
        reuse_csr: Set(reuse_csr),
        gift_root_domain: Set(false),
        refund_period: Set(30),
        cost: Set(json!({
            "price": {"12": "100.00", "24": "180.00"},
            "alternative_standard_price": {"12": "20.00", "24": "36.00"},
            "alternative_wildcard_price": {"12": "80.00", "24": "150.00"},
        })),
        weight: Set(0),
        status: Set(1),
        ..Default::default()
    }
    .insert(db)
    .await
    .unwrap()
}

fn submission(user: &users::Model, product: &products::Model, domains: &str) -> SubmissionParams {
    SubmissionParams {
        action: CertKind::New,
        channel: Channel::Api,
        plus: true,
        refer_id: None,
        unique_value: None,
        order_id: None,
        user_id: Some(user.id),
        product_id: Some(product.id),
        period: 12,
        csr: None,
        csr_generate: true,
        encryption: Some(certpilot_orders::models::EncryptionInput {
            alg: Some("ecdsa".to_string()),
            bits: Some(256),
            digest_alg: Some("sha256".to_string()),
        }),
        private_key: None,
        validation_method: ValidationMethod::Cname,
        domains: domains.to_string(),
        contact: None,
        organization: None,
        issue_verify: false,
    }
}

#[tokio::test]
async fn new_order_creates_order_and_cert_with_derived_dcv() {
    let db = setup_test_db().await;
    let service = service(db.clone()).await;
    let user = seed_user(&db, "0", "0").await;
    let product = seed_product(&db, false).await;

    let reference = service
        .new_order(Actor::operator(), submission(&user, &product, "example.com"))
        .await
        .unwrap();

    let cert = certs::Entity::find_by_id(reference.cert_id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(cert.status, "unpaid");
    assert_eq!(cert.standard_count, 1);
    assert_eq!(cert.amount, Decimal::from_str("100.00").unwrap());
    // The dedup key is derived from the CSR at insert.
    assert_eq!(cert.csr_md5, certpilot_core::md5_hex(cert.csr.as_bytes()));
    assert_eq!(cert.refer_id.len(), 32);
    // Sectigo products carry CSR-derived DCV material.
    let dcv: certpilot_core::Dcv = serde_json::from_value(cert.dcv.unwrap()).unwrap();
    assert!(dcv.dns.unwrap().value.ends_with(".sectigo.com"));

    let order = orders::Entity::find_by_id(reference.order_id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.latest_cert_id, Some(reference.cert_id));
}

#[tokio::test]
async fn too_many_standard_names_fail_before_any_vendor_call() {
    let db = setup_test_db().await;
    let service = service(db.clone()).await;
    let user = seed_user(&db, "0", "0").await;
    let product = seed_product(&db, false).await;

    let result = service
        .new_order(
            Actor::operator(),
            submission(&user, &product, "a.com,b.com,c.com"),
        )
        .await;

    match result {
        Err(OrderError::Validation(report)) => {
            assert!(report
                .domains
                .count
                .standard
                .unwrap()
                .contains("cannot exceed 2"));
        }
        other => panic!("expected validation error, got {:?}", other.map(|r| r.order_id)),
    }

    // Nothing was persisted.
    assert_eq!(
        orders::Entity::find().all(db.as_ref()).await.unwrap().len(),
        0
    );
}

#[tokio::test]
async fn csr_reuse_follows_the_product_flag() {
    let db = setup_test_db().await;
    let service = service(db.clone()).await;
    let user = seed_user(&db, "0", "0").await;
    let strict = seed_product(&db, false).await;
    let lenient = seed_product(&db, true).await;

    let generated = certpilot_pki::csr::generate(
        &certpilot_pki::csr::EncryptionParams::normalize(Some("ecdsa"), Some(256), None),
        &certpilot_pki::csr::SubjectInfo {
            common_name: "example.com".to_string(),
            ..Default::default()
        },
    )
    .unwrap();

    // Distinct refer ids keep the submissions outside the duplicate
    // suppression window.
    let mut params = submission(&user, &strict, "example.com");
    params.refer_id = Some("a".repeat(32));
    params.csr = Some(generated.csr.clone());
    params.csr_generate = false;
    service.new_order(Actor::operator(), params).await.unwrap();

    // Same CSR against a product that forbids reuse.
    let mut params = submission(&user, &strict, "example.com");
    params.refer_id = Some("b".repeat(32));
    params.csr = Some(generated.csr.clone());
    params.csr_generate = false;
    let result = service.new_order(Actor::operator(), params).await;
    assert!(matches!(
        result,
        Err(OrderError::Rejected { ref message, .. }) if message.contains("CSR")
    ));

    // Same CSR against a product that allows reuse.
    let mut params = submission(&user, &lenient, "example.com");
    params.refer_id = Some("c".repeat(32));
    params.csr = Some(generated.csr);
    params.csr_generate = false;
    service.new_order(Actor::operator(), params).await.unwrap();
}

#[tokio::test]
async fn duplicate_submission_is_suppressed_within_window() {
    let db = setup_test_db().await;
    let service = service(db.clone()).await;
    let user = seed_user(&db, "0", "0").await;
    let product = seed_product(&db, true).await;

    let mut params = submission(&user, &product, "dup.example.com");
    params.refer_id = Some("a".repeat(32));
    service
        .new_order(Actor::operator(), params.clone())
        .await
        .unwrap();

    // Identical parameters inside the window: suppressed before any
    // validation runs.
    let result = service.new_order(Actor::operator(), params).await;
    assert!(matches!(result, Err(OrderError::Duplicate { retry_after }) if retry_after > 0));
}

async fn seeded_unpaid_order(
    db: &Arc<DbConnection>,
    service: &OrderService,
    balance: &str,
    credit_limit: &str,
    amount: &str,
) -> (users::Model, i64) {
    let user = seed_user(db, balance, credit_limit).await;
    let product = seed_product(db, true).await;

    let reference = service
        .new_order(Actor::operator(), submission(&user, &product, "example.com"))
        .await
        .unwrap();

    // Pin the cert amount to the scenario value.
    let cert = certs::Entity::find_by_id(reference.cert_id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    let mut update: certs::ActiveModel = cert.into();
    update.amount = Set(Decimal::from_str(amount).unwrap());
    update.update(db.as_ref()).await.unwrap();

    (user, reference.order_id)
}

#[tokio::test]
async fn charge_rejects_below_the_credit_floor() {
    let db = setup_test_db().await;
    let service = service(db.clone()).await;
    // balance -90, floor -100, charge 20: would land at -110.
    let (user, order_id) = seeded_unpaid_order(&db, &service, "-90", "-100", "20.00").await;

    let outcome = service
        .charge(Actor::customer(user.id, Channel::Web), order_id, true)
        .await
        .unwrap();

    assert!(!outcome.charged);
    assert_eq!(outcome.message.as_deref(), Some("insufficient balance"));

    // Atomicity: no partial write survived the rejection.
    let unchanged = users::Entity::find_by_id(user.id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.balance, Decimal::from_str("-90").unwrap());
    assert_eq!(
        transactions::Entity::find()
            .filter(transactions::Column::OrderId.eq(order_id))
            .all(db.as_ref())
            .await
            .unwrap()
            .len(),
        0
    );
    let order = orders::Entity::find_by_id(order_id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(order.purchased_standard_count, 0);
    let cert = certs::Entity::find_by_id(order.latest_cert_id.unwrap())
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cert.status, "unpaid");
}

#[tokio::test]
async fn charge_accepts_inside_the_credit_floor() {
    let db = setup_test_db().await;
    let service = service(db.clone()).await;
    // balance -90, floor -100, charge 5: lands at -95.
    let (user, order_id) = seeded_unpaid_order(&db, &service, "-90", "-100", "5.00").await;

    let outcome = service
        .charge(Actor::customer(user.id, Channel::Web), order_id, true)
        .await
        .unwrap();
    assert!(outcome.charged);

    let updated = users::Entity::find_by_id(user.id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(updated.balance, Decimal::from_str("-95").unwrap());

    let order = orders::Entity::find_by_id(order_id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    // Counters raised to max(current, cert counts, product minimums).
    assert_eq!(order.purchased_standard_count, 1);

    let cert = certs::Entity::find_by_id(order.latest_cert_id.unwrap())
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cert.status, "pending");

    let ledger = transactions::Entity::find()
        .filter(transactions::Column::OrderId.eq(order_id))
        .all(db.as_ref())
        .await
        .unwrap();
    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger[0].amount, Decimal::from_str("-5.00").unwrap());
}

#[tokio::test]
async fn operator_charges_bypass_the_credit_floor() {
    let db = setup_test_db().await;
    let service = service(db.clone()).await;
    let (_, order_id) = seeded_unpaid_order(&db, &service, "-90", "-100", "20.00").await;

    let outcome = service.charge(Actor::operator(), order_id, true).await.unwrap();
    assert!(outcome.charged);
}

#[tokio::test]
async fn cancel_pending_refunds_the_full_order() {
    let db = setup_test_db().await;
    let service = service(db.clone()).await;
    let (user, order_id) = seeded_unpaid_order(&db, &service, "100", "0", "40.00").await;

    let actor = Actor::customer(user.id, Channel::Web);
    service.charge(actor, order_id, false).await.unwrap();
    service.cancel_pending(actor, order_id).await.unwrap();

    let refunded = users::Entity::find_by_id(user.id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    // Refund restores the order amount, not the scenario-pinned cert
    // amount alone.
    assert_eq!(refunded.balance, Decimal::from_str("160.00").unwrap());

    let order = orders::Entity::find_by_id(order_id)
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    let cert = certs::Entity::find_by_id(order.latest_cert_id.unwrap())
        .one(db.as_ref())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cert.status, "cancelled");
    assert_eq!(order.purchased_standard_count, 0);
}
