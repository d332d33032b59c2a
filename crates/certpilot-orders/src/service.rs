//! The action orchestrator: one service sequencing CSR handling,
//! validation, billing, vendor calls and task scheduling per customer
//! action. Vendor network calls always happen outside database
//! transactions; ledger and cert mutations share one transaction.

use chrono::{Duration, Utc};
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter, QueryOrder,
    TransactionTrait,
};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use certpilot_core::{
    generate_refer_id, generate_unique_value, params_fingerprint, AppSettings, CertKind,
    CertStatus, Dcv, DomainValidation, TaskAction, TaskScheduler, ValidationMethod,
};
use certpilot_database::DbConnection;
use certpilot_email::{certificate_issued_notice, expiry_reminder_notice, EmailProvider, IssuedNoticeContext};
use certpilot_entities::{certs, chains, domain_validation_records, orders, products, users};
use certpilot_kv::{CounterStore, DuplicateGuard, RetryGuard};
use certpilot_pki::csr::{self, EncryptionParams, SubjectInfo};
use certpilot_pki::dcv::{generate_dcv, generate_validation, merge_validation};
use certpilot_pki::domain::{add_gift_domains, san_counts, split_domains, to_unicode_domains};
use certpilot_vendors::{
    CertContext, ContactInfo, IssueOutcome, IssueRequest, OrganizationInfo, VendorAdapter,
    VendorRegistry,
};

use crate::errors::OrderError;
use crate::models::{Actor, OrderRef, SubmissionParams};
use crate::pricing;
use crate::validator;
use crate::verify::{VerifyClient, VerifyOutcome};

/// Window inside which an identical submission is suppressed.
const DUPLICATE_WINDOW_SECONDS: i64 = 60;

pub struct OrderService {
    pub(crate) db: Arc<DbConnection>,
    pub(crate) vendors: Arc<VendorRegistry>,
    pub(crate) tasks: Arc<dyn TaskScheduler>,
    pub(crate) duplicate_guard: DuplicateGuard,
    pub(crate) retry_guard: RetryGuard,
    pub(crate) verify: Arc<dyn VerifyClient>,
    pub(crate) mailer: Arc<dyn EmailProvider>,
    pub(crate) settings: AppSettings,
}

/// Everything one operation needs about an order.
pub(crate) struct OrderBundle {
    pub order: orders::Model,
    pub cert: certs::Model,
    pub product: products::Model,
    pub user: users::Model,
}

impl OrderService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<DbConnection>,
        vendors: Arc<VendorRegistry>,
        tasks: Arc<dyn TaskScheduler>,
        kv: Arc<dyn CounterStore>,
        verify: Arc<dyn VerifyClient>,
        mailer: Arc<dyn EmailProvider>,
        settings: AppSettings,
    ) -> Self {
        Self {
            db,
            vendors,
            tasks,
            duplicate_guard: DuplicateGuard::new(kv.clone()),
            retry_guard: RetryGuard::new(kv),
            verify,
            mailer,
            settings,
        }
    }

    // ------------------------------------------------------------------
    // Submission operations
    // ------------------------------------------------------------------

    pub async fn new_order(
        &self,
        actor: Actor,
        mut params: SubmissionParams,
    ) -> Result<OrderRef, OrderError> {
        params.action = CertKind::New;
        self.check_duplicate("new", &params).await?;

        let user_id = actor
            .user_id
            .or(params.user_id)
            .ok_or_else(|| OrderError::rejected("user id is required"))?;
        let user = self.find_user(user_id).await?;

        let product = self
            .find_product(
                params
                    .product_id
                    .ok_or_else(|| OrderError::rejected("product id is required"))?,
            )
            .await?;

        let domains = to_unicode_domains(&params.domains);
        let alternative_names = if product.gift_root_domain {
            add_gift_domains(&domains)
        } else {
            domains.clone()
        };
        params.domains = alternative_names.clone();

        self.validate_submission(&params, &product).await?;

        let assembled = self.assemble_cert(&params, &product, &alternative_names, None).await?;

        let amount = pricing::order_amount(
            &product,
            params.period,
            assembled.standard_count,
            assembled.wildcard_count,
        );

        if params.issue_verify {
            self.pre_issue_check(&product.ca, &alternative_names).await?;
        }

        let params_json = serde_json::to_value(&params).unwrap_or_default();
        let channel = params.channel;
        let contact = params.contact.clone();
        let organization = params.organization.clone();
        let period = params.period;
        let plus = params.plus;

        let txn = self.db.begin().await?;

        let order = orders::ActiveModel {
            user_id: Set(user.id),
            product_id: Set(product.id),
            brand: Set(product.brand.clone()),
            plus: Set(plus),
            period: Set(period),
            amount: Set(amount),
            contact: Set(contact.map(|c| serde_json::to_value(c).unwrap_or_default())),
            organization: Set(organization.map(|o| serde_json::to_value(o).unwrap_or_default())),
            purchased_standard_count: Set(0),
            purchased_wildcard_count: Set(0),
            latest_cert_id: Set(None),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let cert = certs::ActiveModel {
            order_id: Set(order.id),
            last_cert_id: Set(None),
            action: Set(CertKind::New.as_str().to_string()),
            channel: Set(channel.as_str().to_string()),
            refer_id: Set(assembled.refer_id.clone()),
            unique_value: Set(assembled.unique_value.clone()),
            params: Set(Some(params_json)),
            amount: Set(amount),
            csr: Set(assembled.csr.clone()),
            csr_md5: Set(String::new()),
            private_key: Set(assembled.private_key.clone()),
            common_name: Set(assembled.common_name.clone()),
            alternative_names: Set(alternative_names.clone()),
            standard_count: Set(assembled.standard_count),
            wildcard_count: Set(assembled.wildcard_count),
            dcv: Set(Some(serde_json::to_value(&assembled.dcv).unwrap_or_default())),
            validation: Set(Some(
                serde_json::to_value(&assembled.validation).unwrap_or_default(),
            )),
            status: Set(CertStatus::Unpaid.as_str().to_string()),
            cert_apply_status: Set(0),
            domain_verify_status: Set(0),
            org_verify_status: Set(0),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut order_update: orders::ActiveModel = order.clone().into();
        order_update.latest_cert_id = Set(Some(cert.id));
        order_update.update(&txn).await?;

        txn.commit().await?;

        info!("created order {} cert {} for user {}", order.id, cert.id, user.id);

        Ok(OrderRef {
            order_id: order.id,
            cert_id: cert.id,
        })
    }

    pub async fn renew(
        &self,
        actor: Actor,
        params: SubmissionParams,
    ) -> Result<OrderRef, OrderError> {
        self.renew_or_reissue(actor, params, CertKind::Renew).await
    }

    pub async fn reissue(
        &self,
        actor: Actor,
        params: SubmissionParams,
    ) -> Result<OrderRef, OrderError> {
        self.renew_or_reissue(actor, params, CertKind::Reissue).await
    }

    async fn renew_or_reissue(
        &self,
        actor: Actor,
        mut params: SubmissionParams,
        action: CertKind,
    ) -> Result<OrderRef, OrderError> {
        params.action = action;
        self.check_duplicate(action.as_str(), &params).await?;

        let order_id = params
            .order_id
            .ok_or_else(|| OrderError::rejected("order id is required"))?;

        let bundle = self.load_bundle(actor, order_id).await?;
        let last_cert = bundle.cert.clone();
        let product = bundle.product.clone();

        if CertStatus::from_str(&last_cert.status) != Ok(CertStatus::Active) {
            return Err(OrderError::rejected("order is not in an active state"));
        }
        match action {
            CertKind::Renew => {
                if !product.renew {
                    return Err(OrderError::rejected("product does not support renewal"));
                }
                if product.status == 0 {
                    return Err(OrderError::rejected("product is disabled"));
                }
            }
            CertKind::Reissue => {
                if !product.reissue {
                    return Err(OrderError::rejected("product does not support reissue"));
                }
                // A reissue keeps the running period.
                params.period = bundle.order.period;
            }
            CertKind::New => unreachable!(),
        }

        let domains = to_unicode_domains(&params.domains);
        let mut alternative_names = if product.gift_root_domain {
            add_gift_domains(&domains)
        } else {
            domains.clone()
        };

        let mut counts = san_counts(&alternative_names, product.gift_root_domain);

        if !product.add_san
            && (counts.standard_count > last_cert.standard_count
                || counts.wildcard_count > last_cert.wildcard_count)
        {
            return Err(OrderError::rejected(
                "domain count exceeds the previous certificate",
            ));
        }

        if !product.replace_san {
            // Merge the previous SAN set forward and re-check the caps.
            let mut merged = split_domains(&alternative_names);
            for domain in split_domains(&last_cert.alternative_names) {
                if !merged.iter().any(|d| d.eq_ignore_ascii_case(&domain)) {
                    merged.push(domain);
                }
            }
            alternative_names = merged.join(",");

            let count_report = validator::validate_san_counts(&product, &alternative_names);
            if !count_report.is_empty() {
                return Err(OrderError::rejected("domain count exceeds the product limit"));
            }

            let added: Vec<String> = split_domains(&alternative_names)
                .into_iter()
                .filter(|d| {
                    !split_domains(&last_cert.alternative_names)
                        .iter()
                        .any(|p| p.eq_ignore_ascii_case(d))
                })
                .collect();
            let added_counts = san_counts(&added.join(","), product.gift_root_domain);
            counts.standard_count = added_counts.standard_count + last_cert.standard_count;
            counts.wildcard_count = added_counts.wildcard_count + last_cert.wildcard_count;
        }

        params.domains = alternative_names.clone();
        self.validate_submission(&params, &product).await?;

        // A CSR signed with the previous key keeps that key on record.
        if params.private_key.is_none() {
            if let (Some(submitted), Some(previous_key)) =
                (params.csr.as_deref(), last_cert.private_key.as_deref())
            {
                if csr::match_key(submitted, previous_key) {
                    params.private_key = Some(previous_key.to_string());
                }
            }
        }

        let assembled = self
            .assemble_cert(&params, &product, &alternative_names, Some(counts))
            .await?;

        let amount = match action {
            CertKind::Renew => pricing::order_amount(
                &product,
                params.period,
                assembled.standard_count,
                assembled.wildcard_count,
            ),
            _ => pricing::reissue_amount(
                &product,
                bundle.order.period,
                bundle.order.purchased_standard_count,
                bundle.order.purchased_wildcard_count,
                assembled.standard_count,
                assembled.wildcard_count,
            ),
        };

        if params.issue_verify {
            self.pre_issue_check(&product.ca, &alternative_names).await?;
        }

        let params_json = serde_json::to_value(&params).unwrap_or_default();
        let channel = params.channel;
        let period = params.period;

        let txn = self.db.begin().await?;

        let cert = certs::ActiveModel {
            order_id: Set(bundle.order.id),
            last_cert_id: Set(Some(last_cert.id)),
            action: Set(action.as_str().to_string()),
            channel: Set(channel.as_str().to_string()),
            refer_id: Set(assembled.refer_id.clone()),
            unique_value: Set(assembled.unique_value.clone()),
            params: Set(Some(params_json)),
            amount: Set(amount),
            csr: Set(assembled.csr.clone()),
            csr_md5: Set(String::new()),
            private_key: Set(assembled.private_key.clone()),
            common_name: Set(assembled.common_name.clone()),
            alternative_names: Set(alternative_names.clone()),
            standard_count: Set(assembled.standard_count),
            wildcard_count: Set(assembled.wildcard_count),
            dcv: Set(Some(serde_json::to_value(&assembled.dcv).unwrap_or_default())),
            validation: Set(Some(
                serde_json::to_value(&assembled.validation).unwrap_or_default(),
            )),
            status: Set(CertStatus::Unpaid.as_str().to_string()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        // The previous cert reaches its side-exit and the order pointer
        // moves forward.
        let exit_status = match action {
            CertKind::Renew => CertStatus::Renewed,
            _ => CertStatus::Reissued,
        };
        let mut last_update: certs::ActiveModel = last_cert.clone().into();
        last_update.status = Set(exit_status.as_str().to_string());
        last_update.update(&txn).await?;

        let mut order_update: orders::ActiveModel = bundle.order.clone().into();
        order_update.latest_cert_id = Set(Some(cert.id));
        order_update.amount = Set(bundle.order.amount + amount);
        if action == CertKind::Renew {
            order_update.period = Set(period);
        }
        order_update.update(&txn).await?;

        txn.commit().await?;

        Ok(OrderRef {
            order_id: bundle.order.id,
            cert_id: cert.id,
        })
    }

    // ------------------------------------------------------------------
    // Payment and vendor submission
    // ------------------------------------------------------------------

    /// Charge the order and schedule the asynchronous vendor submission.
    pub async fn pay(
        &self,
        actor: Actor,
        order_id: i64,
    ) -> Result<crate::models::ChargeOutcome, OrderError> {
        self.charge(actor, order_id, true).await
    }

    /// Submit a pending cert to its CA. Executed by the `commit` task.
    pub async fn commit(&self, actor: Actor, order_id: i64) -> Result<(), OrderError> {
        let mut bundle = self.load_bundle(actor, order_id).await?;

        if CertStatus::from_str(&bundle.cert.status) == Ok(CertStatus::Unpaid) {
            let outcome = self.charge(actor, order_id, false).await?;
            if !outcome.charged {
                return Err(OrderError::Rejected {
                    message: outcome
                        .message
                        .unwrap_or_else(|| "charge failed".to_string()),
                    errors: outcome.errors,
                });
            }
            bundle = self.load_bundle(actor, order_id).await?;
        }

        if CertStatus::from_str(&bundle.cert.status) != Ok(CertStatus::Pending) {
            return Err(OrderError::rejected("order is not awaiting submission"));
        }

        let adapter = self.vendors.resolve(&bundle.product.source)?;
        let request = self.issue_request(&bundle).await?;
        let action = CertKind::from_str(&bundle.cert.action)
            .map_err(OrderError::Internal)?;

        // Network call happens with no database locks held.
        let outcome = match action {
            CertKind::New => adapter.new_order(&request).await?,
            CertKind::Renew => adapter.renew(&request).await?,
            CertKind::Reissue => adapter.reissue(&request).await?,
        };

        self.store_issue_outcome(&bundle, outcome).await?;

        Ok(())
    }

    async fn store_issue_outcome(
        &self,
        bundle: &OrderBundle,
        outcome: IssueOutcome,
    ) -> Result<(), OrderError> {
        let local_validation = self.cert_validation(&bundle.cert);

        let mut update: certs::ActiveModel = bundle.cert.clone().into();
        update.api_id = Set(Some(outcome.api_id.clone()));
        update.cert_apply_status = Set(outcome.cert_apply_status);
        update.status = Set(CertStatus::Processing.as_str().to_string());

        if let Some(dcv) = &outcome.dcv {
            update.dcv = Set(Some(serde_json::to_value(dcv).unwrap_or_default()));
        }
        if let Some(validation) = outcome.validation {
            let merged = merge_validation(validation, &local_validation);
            update.validation = Set(Some(serde_json::to_value(&merged).unwrap_or_default()));
        }

        update.update(self.db.as_ref()).await?;

        info!(
            "order {} submitted to {} as {}",
            bundle.order.id, bundle.product.source, outcome.api_id
        );

        Ok(())
    }

    // ------------------------------------------------------------------
    // Vendor state synchronization
    // ------------------------------------------------------------------

    /// Pull the canonical snapshot and advance local state. Executed by
    /// the `sync` task and the validation poller.
    pub async fn sync(&self, actor: Actor, order_id: i64) -> Result<(), OrderError> {
        let bundle = self.load_bundle(actor, order_id).await?;
        let api_id = bundle
            .cert
            .api_id
            .clone()
            .ok_or_else(|| OrderError::rejected("order has no vendor reference"))?;

        let adapter = self.vendors.resolve(&bundle.product.source)?;
        let snapshot = adapter.get(&api_id).await?;

        let current = CertStatus::from_str(&bundle.cert.status)
            .map_err(OrderError::Internal)?;
        let local_validation = self.cert_validation(&bundle.cert);

        let mut update: certs::ActiveModel = bundle.cert.clone().into();

        update.cert_apply_status = Set(snapshot.cert_apply_status);
        update.domain_verify_status = Set(snapshot.domain_verify_status);
        update.org_verify_status = Set(snapshot.org_verify_status);

        if let Some(names) = &snapshot.alternative_names {
            update.alternative_names = Set(names.clone());
        }
        if let Some(dcv) = &snapshot.dcv {
            update.dcv = Set(Some(serde_json::to_value(dcv).unwrap_or_default()));
        }
        if let Some(validation) = snapshot.validation.clone() {
            let merged = merge_validation(validation, &local_validation);
            update.validation = Set(Some(serde_json::to_value(&merged).unwrap_or_default()));
        }

        let mut next_status = snapshot.status;
        if next_status == Some(CertStatus::Failed) {
            // Unknown vendor statuses map to failed; give a glitching
            // vendor a bounded number of observations before the cert is
            // actually failed.
            if self
                .retry_guard
                .should_retry(order_id, "sync", "vendor_failed", 3)
                .await?
            {
                warn!("order {} reported failed by vendor, observing again", order_id);
                next_status = None;
            }
        }

        let mut activated = false;
        if let Some(new_status) = next_status {
            if Self::should_advance(current, new_status) {
                update.status = Set(new_status.as_str().to_string());
                if new_status == CertStatus::Active {
                    activated = true;
                }
            }
        }

        if activated {
            if let Some(certificate) = &snapshot.certificate {
                match csr::parse_certificate(certificate) {
                    Ok(parsed) => {
                        update.cert = Set(Some(certificate.clone()));
                        update.issuer = Set(Some(parsed.issuer.clone()));
                        update.serial_number = Set(Some(parsed.serial_number));
                        update.fingerprint = Set(Some(parsed.fingerprint));
                        update.encryption_alg = Set(Some(parsed.encryption_alg));
                        update.encryption_bits = Set(Some(parsed.encryption_bits));
                        update.signature_digest_alg = Set(Some(parsed.signature_digest_alg));
                        update.issued_at = Set(Some(parsed.issued_at));
                        update.expires_at = Set(Some(parsed.expires_at));

                        if let Some(chain) = &snapshot.intermediate_cert {
                            self.store_chain(&parsed.issuer, chain).await?;
                        }
                    }
                    Err(e) => {
                        warn!("issued certificate failed to parse: {}", e);
                        update.cert = Set(Some(certificate.clone()));
                    }
                }
            }
        }

        update.update(self.db.as_ref()).await?;

        if activated {
            // Escalation schedule is done with this order.
            domain_validation_records::Entity::delete_many()
                .filter(domain_validation_records::Column::OrderId.eq(order_id))
                .exec(self.db.as_ref())
                .await?;

            self.tasks
                .create_task(&[order_id], TaskAction::SendActive, 0)
                .await?;
        }

        Ok(())
    }

    /// Forward movement only; terminal states never change again.
    fn should_advance(current: CertStatus, next: CertStatus) -> bool {
        if current == next || current.is_terminal() {
            return false;
        }

        fn rank(status: CertStatus) -> Option<u8> {
            match status {
                CertStatus::Unpaid => Some(0),
                CertStatus::Pending => Some(1),
                CertStatus::Processing => Some(2),
                CertStatus::Approving => Some(3),
                CertStatus::Active => Some(4),
                _ => None,
            }
        }

        match (rank(current), rank(next)) {
            (Some(a), Some(b)) => b > a,
            // Terminal side-exits are always reachable from a live state.
            (Some(_), None) => true,
            _ => false,
        }
    }

    // ------------------------------------------------------------------
    // DCV operations
    // ------------------------------------------------------------------

    /// Ask the CA to re-check the published validation material.
    pub async fn revalidate(&self, actor: Actor, order_id: i64) -> Result<(), OrderError> {
        let bundle = self.load_bundle(actor, order_id).await?;
        let api_id = bundle
            .cert
            .api_id
            .clone()
            .ok_or_else(|| OrderError::rejected("order has no vendor reference"))?;

        let adapter = self.vendors.resolve(&bundle.product.source)?;
        adapter
            .revalidate(&api_id, &self.cert_context(&bundle.cert))
            .await?;

        Ok(())
    }

    /// Switch the validation method; resets the polling escalation.
    pub async fn update_dcv(
        &self,
        actor: Actor,
        order_id: i64,
        method: ValidationMethod,
    ) -> Result<(), OrderError> {
        let bundle = self.load_bundle(actor, order_id).await?;
        let api_id = bundle
            .cert
            .api_id
            .clone()
            .ok_or_else(|| OrderError::rejected("order has no vendor reference"))?;

        self.check_method_compatibility(&bundle.cert.alternative_names, method)?;

        let adapter = self.vendors.resolve(&bundle.product.source)?;
        let updated = adapter
            .update_dcv(&api_id, method, &self.cert_context(&bundle.cert))
            .await?;

        let local = generate_validation(
            &updated
                .dcv
                .clone()
                .unwrap_or_else(|| Dcv::bare(method)),
            &bundle.cert.alternative_names,
        );

        let mut update: certs::ActiveModel = bundle.cert.clone().into();
        if let Some(dcv) = &updated.dcv {
            update.dcv = Set(Some(serde_json::to_value(dcv).unwrap_or_default()));
        }
        let merged = merge_validation(updated.validation.unwrap_or_else(|| local.clone()), &local);
        update.validation = Set(Some(serde_json::to_value(&merged).unwrap_or_default()));
        update.update(self.db.as_ref()).await?;

        // Method changed: restart the escalation schedule and abandon any
        // queued checks built on the old instructions.
        domain_validation_records::Entity::delete_many()
            .filter(domain_validation_records::Column::OrderId.eq(order_id))
            .exec(self.db.as_ref())
            .await?;
        self.tasks
            .delete_task(&[order_id], &[TaskAction::Revalidate, TaskAction::Sync])
            .await?;

        Ok(())
    }

    /// Drop SANs whose validation never completed so the rest can issue.
    pub async fn remove_unverified_domains(
        &self,
        actor: Actor,
        order_id: i64,
    ) -> Result<(), OrderError> {
        let bundle = self.load_bundle(actor, order_id).await?;
        let api_id = bundle
            .cert
            .api_id
            .clone()
            .ok_or_else(|| OrderError::rejected("order has no vendor reference"))?;

        let adapter = self.vendors.resolve(&bundle.product.source)?;
        adapter
            .remove_unverified_domains(&api_id, &self.cert_context(&bundle.cert))
            .await?;

        self.sync(actor, order_id).await
    }

    /// Wildcards cannot prove control over a file path; IP literals can
    /// prove nothing else. Submission parameters were already validated,
    /// so this gate only runs for method changes.
    pub(crate) fn check_method_compatibility(
        &self,
        alternative_names: &str,
        method: ValidationMethod,
    ) -> Result<(), OrderError> {
        for domain in split_domains(alternative_names) {
            let kind = certpilot_pki::domain::domain_type(&domain);
            if kind == certpilot_pki::domain::DomainType::Wildcard && method.is_file() {
                return Err(OrderError::rejected(format!(
                    "wildcard domain {} cannot use the {} method",
                    domain, method
                )));
            }
            if kind.is_ip() && !method.is_file() {
                return Err(OrderError::rejected(format!(
                    "IP address {} can only use file validation methods",
                    domain
                )));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Cancellation
    // ------------------------------------------------------------------

    /// Route a cancellation by the cert's current state.
    pub async fn cancel(&self, actor: Actor, order_id: i64) -> Result<(), OrderError> {
        let bundle = self.load_bundle(actor, order_id).await?;
        let status = CertStatus::from_str(&bundle.cert.status)
            .map_err(OrderError::Internal)?;

        match status {
            CertStatus::Unpaid => self.delete(actor, order_id).await,
            CertStatus::Pending => self.cancel_pending(actor, order_id).await,
            CertStatus::Processing | CertStatus::Approving => {
                self.mark_cancelling(&bundle).await?;
                self.tasks
                    .create_task(&[order_id], TaskAction::Cancel, 0)
                    .await?;
                Ok(())
            }
            CertStatus::Active => {
                if !self.within_refund_period(&bundle) {
                    return Err(OrderError::rejected(
                        "the refund period for this certificate has passed",
                    ));
                }
                self.mark_cancelling(&bundle).await?;
                self.tasks
                    .create_task(&[order_id], TaskAction::RevokeCancel, 0)
                    .await?;
                Ok(())
            }
            _ => Err(OrderError::rejected("order cannot be cancelled in its current state")),
        }
    }

    async fn mark_cancelling(&self, bundle: &OrderBundle) -> Result<(), OrderError> {
        let mut update: certs::ActiveModel = bundle.cert.clone().into();
        update.status = Set(CertStatus::Cancelling.as_str().to_string());
        update.update(self.db.as_ref()).await?;
        Ok(())
    }

    fn within_refund_period(&self, bundle: &OrderBundle) -> bool {
        match bundle.cert.issued_at {
            Some(issued_at) => {
                issued_at + Duration::days(bundle.product.refund_period as i64) > Utc::now()
            }
            None => true,
        }
    }

    /// Execute the vendor-side cancel for an order in `cancelling`.
    /// Executed by the `cancel` task.
    pub async fn commit_cancel(&self, actor: Actor, order_id: i64) -> Result<(), OrderError> {
        self.finish_cancel(actor, order_id, CertStatus::Cancelled).await
    }

    /// Revoke an issued certificate and refund inside the refund window.
    pub async fn revoke_cancel(&self, actor: Actor, order_id: i64) -> Result<(), OrderError> {
        self.finish_cancel(actor, order_id, CertStatus::Revoked).await
    }

    async fn finish_cancel(
        &self,
        actor: Actor,
        order_id: i64,
        terminal: CertStatus,
    ) -> Result<(), OrderError> {
        let bundle = self.load_bundle(actor, order_id).await?;
        if CertStatus::from_str(&bundle.cert.status) != Ok(CertStatus::Cancelling) {
            return Err(OrderError::rejected("order is not being cancelled"));
        }

        // Vendor first, ledger second: the adapter treats already-
        // cancelled/revoked as success, so a retry converges.
        if let Some(api_id) = bundle.cert.api_id.clone() {
            let adapter = self.vendors.resolve(&bundle.product.source)?;
            adapter
                .cancel(&api_id, &self.cert_context(&bundle.cert))
                .await?;
        }

        let refund = terminal == CertStatus::Cancelled || self.within_refund_period(&bundle);
        self.settle_cancellation(&bundle, terminal, refund).await?;

        domain_validation_records::Entity::delete_many()
            .filter(domain_validation_records::Column::OrderId.eq(order_id))
            .exec(self.db.as_ref())
            .await?;
        self.tasks
            .delete_task(
                &[order_id],
                &[TaskAction::Commit, TaskAction::Sync, TaskAction::Revalidate],
            )
            .await?;

        Ok(())
    }

    // ------------------------------------------------------------------
    // Notifications and pre-checks
    // ------------------------------------------------------------------

    /// Mail the issued certificate to the customer. Executed by the
    /// `send_active` task.
    pub async fn send_active(&self, order_id: i64, email: Option<String>) -> Result<(), OrderError> {
        let bundle = self.load_bundle(Actor::operator(), order_id).await?;
        if CertStatus::from_str(&bundle.cert.status) != Ok(CertStatus::Active) {
            return Err(OrderError::rejected("certificate has not been issued"));
        }

        let to = email
            .or_else(|| bundle.user.email.clone())
            .ok_or_else(|| OrderError::rejected("no email address on record"))?;

        let intermediate = match &bundle.cert.issuer {
            Some(issuer) => chains::Entity::find()
                .filter(chains::Column::CommonName.eq(issuer.clone()))
                .one(self.db.as_ref())
                .await?
                .map(|chain| chain.intermediate_cert),
            None => None,
        };

        let message = certificate_issued_notice(
            &self.settings.site,
            &IssuedNoticeContext {
                to,
                to_name: bundle.user.username.clone(),
                product_name: bundle.product.name.clone(),
                common_name: bundle.cert.common_name.clone(),
                certificate: bundle.cert.cert.clone().unwrap_or_default(),
                intermediate,
                private_key: bundle.cert.private_key.clone(),
            },
        );

        self.mailer
            .send(&message)
            .await
            .map_err(|e| OrderError::rejected(e.to_string()))?;

        Ok(())
    }

    /// Mail the 30-day expiry reminder. Executed by the `send_expire`
    /// task, keyed by user id.
    pub async fn send_expire(&self, user_id: i64, email: Option<String>) -> Result<(), OrderError> {
        let user = self.find_user(user_id).await?;
        let to = email
            .or_else(|| user.email.clone())
            .ok_or_else(|| OrderError::rejected("no email address on record"))?;

        let cutoff = Utc::now() + Duration::days(30);
        let expiring = certs::Entity::find()
            .filter(certs::Column::Status.eq(CertStatus::Active.as_str()))
            .filter(certs::Column::ExpiresAt.gt(Utc::now()))
            .filter(certs::Column::ExpiresAt.lte(cutoff))
            .order_by_asc(certs::Column::ExpiresAt)
            .find_also_related(orders::Entity)
            .all(self.db.as_ref())
            .await?;

        let entries: Vec<certpilot_email::ExpiringCertEntry> = expiring
            .into_iter()
            .filter(|(_, order)| order.as_ref().map(|o| o.user_id == user_id).unwrap_or(false))
            .filter_map(|(cert, _)| {
                cert.expires_at.map(|expires_at| certpilot_email::ExpiringCertEntry {
                    common_name: cert.common_name,
                    expires_at,
                })
            })
            .collect();

        if entries.is_empty() {
            return Err(OrderError::rejected("no certificates expire within 30 days"));
        }

        let message = expiry_reminder_notice(&self.settings.site, &to, &user.username, &entries);
        self.mailer
            .send(&message)
            .await
            .map_err(|e| OrderError::rejected(e.to_string()))?;

        Ok(())
    }

    async fn pre_issue_check(&self, ca: &str, domains: &str) -> Result<(), OrderError> {
        match self.verify.issue_verify(ca, domains).await {
            VerifyOutcome::Failed { msg, errors } => Err(OrderError::Rejected {
                message: msg,
                errors,
            }),
            // Helper unreachable: issuance is not blocked.
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    async fn check_duplicate(
        &self,
        action: &str,
        params: &SubmissionParams,
    ) -> Result<(), OrderError> {
        let fingerprint = params_fingerprint(
            action,
            &serde_json::to_value(params).unwrap_or_default(),
        );
        let remaining = self
            .duplicate_guard
            .remaining(&fingerprint, DUPLICATE_WINDOW_SECONDS)
            .await?;
        if remaining > 0 {
            return Err(OrderError::Duplicate {
                retry_after: remaining,
            });
        }
        Ok(())
    }

    async fn validate_submission(
        &self,
        params: &SubmissionParams,
        product: &products::Model,
    ) -> Result<(), OrderError> {
        let mut report = validator::validate(params, product);

        // Idempotency keys are also guarded by unique indexes; the lookup
        // turns a lost race into a friendly message.
        if let Some(refer_id) = &params.refer_id {
            let exists = certs::Entity::find()
                .filter(certs::Column::ReferId.eq(refer_id.clone()))
                .one(self.db.as_ref())
                .await?
                .is_some();
            if exists {
                report.basic.push("refer id has already been used".to_string());
            }
        }

        if report.is_empty() {
            Ok(())
        } else {
            Err(OrderError::Validation(report))
        }
    }

    async fn assemble_cert(
        &self,
        params: &SubmissionParams,
        product: &products::Model,
        alternative_names: &str,
        precomputed: Option<certpilot_pki::domain::SanCounts>,
    ) -> Result<AssembledCert, OrderError> {
        let common_name = split_domains(alternative_names)
            .first()
            .cloned()
            .ok_or_else(|| OrderError::rejected("at least one domain is required"))?;

        let (csr, private_key) = if params.csr_generate {
            let encryption = params
                .encryption
                .as_ref()
                .map(|e| {
                    EncryptionParams::normalize(
                        e.alg.as_deref(),
                        e.bits,
                        e.digest_alg.as_deref(),
                    )
                })
                .unwrap_or_default();
            let generated = csr::generate(
                &encryption,
                &SubjectInfo {
                    common_name: common_name.clone(),
                    organization: params.organization.as_ref().map(|o| o.name.clone()),
                    country: params.organization.as_ref().map(|o| o.country.clone()),
                    state: params.organization.as_ref().map(|o| o.state.clone()),
                    city: params.organization.as_ref().map(|o| o.city.clone()),
                },
            )?;
            (generated.csr, Some(generated.private_key))
        } else {
            let csr = params
                .csr
                .clone()
                .ok_or_else(|| OrderError::rejected("a CSR is required"))?;
            csr::check_domain(&csr, &common_name)?;
            if let Some(key) = &params.private_key {
                if !csr::match_key(&csr, key) {
                    return Err(OrderError::rejected("CSR and private key do not match"));
                }
            }
            if let Some(org) = &params.organization {
                csr::check_organization(&csr, &org.name)?;
            }
            (csr, params.private_key.clone())
        };

        // The CSR hash is the dedup key unless the product allows reuse.
        if !product.reuse_csr {
            let hash = certpilot_core::md5_hex(csr.as_bytes());
            let used = certs::Entity::find()
                .filter(certs::Column::CsrMd5.eq(hash))
                .one(self.db.as_ref())
                .await?
                .is_some();
            if used {
                return Err(OrderError::rejected("CSR has already been used"));
            }
        }

        let unique_value = if product.ca.eq_ignore_ascii_case("sectigo") {
            Some(
                params
                    .unique_value
                    .clone()
                    .unwrap_or_else(generate_unique_value),
            )
        } else {
            params.unique_value.clone()
        };

        let dcv = generate_dcv(
            &product.ca,
            params.validation_method,
            &csr,
            unique_value.as_deref().unwrap_or(""),
        )?;
        let validation = generate_validation(&dcv, alternative_names);

        let counts = precomputed
            .unwrap_or_else(|| san_counts(alternative_names, product.gift_root_domain));

        Ok(AssembledCert {
            refer_id: params.refer_id.clone().unwrap_or_else(generate_refer_id),
            unique_value,
            csr,
            private_key,
            common_name,
            standard_count: counts.standard_count,
            wildcard_count: counts.wildcard_count,
            dcv,
            validation,
        })
    }

    /// Rebuild the vendor request from the stored cert and order.
    async fn issue_request(&self, bundle: &OrderBundle) -> Result<IssueRequest, OrderError> {
        let last_cert = match bundle.cert.last_cert_id {
            Some(id) => certs::Entity::find_by_id(id).one(self.db.as_ref()).await?,
            None => None,
        };

        Ok(IssueRequest {
            action: CertKind::from_str(&bundle.cert.action)
                .map_err(OrderError::Internal)?,
            product_api_id: bundle.product.api_id.clone(),
            period_months: bundle.order.period,
            plus: bundle.order.plus,
            refer_id: bundle.cert.refer_id.clone(),
            unique_value: bundle.cert.unique_value.clone(),
            csr: bundle.cert.csr.clone(),
            common_name: bundle.cert.common_name.clone(),
            alternative_names: bundle.cert.alternative_names.clone(),
            dcv: self
                .cert_dcv(&bundle.cert)
                .unwrap_or_else(|| Dcv::bare(ValidationMethod::Admin)),
            last_api_id: last_cert.as_ref().and_then(|c| c.api_id.clone()),
            last_cert_pem: last_cert.as_ref().and_then(|c| c.cert.clone()),
            contact: bundle
                .order
                .contact
                .clone()
                .and_then(|c| serde_json::from_value::<ContactInfo>(c).ok()),
            organization: bundle
                .order
                .organization
                .clone()
                .and_then(|o| serde_json::from_value::<OrganizationInfo>(o).ok()),
        })
    }

    pub(crate) fn cert_dcv(&self, cert: &certs::Model) -> Option<Dcv> {
        cert.dcv
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
    }

    pub(crate) fn cert_validation(&self, cert: &certs::Model) -> Vec<DomainValidation> {
        cert.validation
            .clone()
            .and_then(|value| serde_json::from_value(value).ok())
            .unwrap_or_default()
    }

    pub(crate) fn cert_context(&self, cert: &certs::Model) -> CertContext {
        CertContext {
            dcv: self.cert_dcv(cert),
            validation: self.cert_validation(cert),
            alternative_names: cert.alternative_names.clone(),
            serial_number: cert.serial_number.clone(),
            requested_method: self.cert_dcv(cert).map(|dcv| dcv.method),
        }
    }

    pub(crate) async fn find_user(&self, user_id: i64) -> Result<users::Model, OrderError> {
        users::Entity::find_by_id(user_id)
            .one(self.db.as_ref())
            .await?
            .filter(|user| user.status == 1)
            .ok_or_else(|| OrderError::NotFound(format!("user {}", user_id)))
    }

    pub(crate) async fn find_product(
        &self,
        product_id: i64,
    ) -> Result<products::Model, OrderError> {
        products::Entity::find_by_id(product_id)
            .one(self.db.as_ref())
            .await?
            .filter(|product| product.status == 1)
            .ok_or_else(|| OrderError::NotFound(format!("product {}", product_id)))
    }

    /// Load an order with its current cert, product and user, scoped to
    /// the acting customer.
    pub(crate) async fn load_bundle(
        &self,
        actor: Actor,
        order_id: i64,
    ) -> Result<OrderBundle, OrderError> {
        let mut query = orders::Entity::find_by_id(order_id);
        if let Some(user_id) = actor.user_id {
            query = query.filter(orders::Column::UserId.eq(user_id));
        }

        let order = query
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("order {}", order_id)))?;

        let cert_id = order
            .latest_cert_id
            .ok_or_else(|| OrderError::NotFound(format!("order {} has no cert", order_id)))?;
        let cert = certs::Entity::find_by_id(cert_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("cert {}", cert_id)))?;

        let product = products::Entity::find_by_id(order.product_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("product {}", order.product_id)))?;

        let user = users::Entity::find_by_id(order.user_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("user {}", order.user_id)))?;

        Ok(OrderBundle {
            order,
            cert,
            product,
            user,
        })
    }

    pub(crate) async fn store_chain(
        &self,
        issuer: &str,
        intermediate: &str,
    ) -> Result<(), OrderError> {
        let existing = chains::Entity::find()
            .filter(chains::Column::CommonName.eq(issuer))
            .one(self.db.as_ref())
            .await?;

        if existing.is_none() {
            chains::ActiveModel {
                common_name: Set(issuer.to_string()),
                intermediate_cert: Set(intermediate.to_string()),
                ..Default::default()
            }
            .insert(self.db.as_ref())
            .await?;
        }

        Ok(())
    }
}

/// Intermediate product of submission assembly.
pub(crate) struct AssembledCert {
    pub refer_id: String,
    pub unique_value: Option<String>,
    pub csr: String,
    pub private_key: Option<String>,
    pub common_name: String,
    pub standard_count: i32,
    pub wildcard_count: i32,
    pub dcv: Dcv,
    pub validation: Vec<DomainValidation>,
}
