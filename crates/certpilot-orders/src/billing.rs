//! Billing/ledger engine: charges and refunds are signed transactions
//! applied atomically with the order counters and the cert status. Any
//! failure rolls back every write of the attempt.

use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseTransaction, EntityTrait,
    QueryFilter, QueryOrder, QuerySelect, TransactionTrait,
};
use std::str::FromStr;
use tracing::info;

use certpilot_core::{CertKind, CertStatus, TaskAction, TaskScheduler};
use certpilot_database::supports_row_locks;
use certpilot_entities::{certs, orders, products, transactions, users};

use crate::errors::OrderError;
use crate::models::{Actor, ChargeOutcome};
use crate::service::OrderService;

impl OrderService {
    /// Charge an unpaid order: write the transaction, raise the purchased
    /// counters, drop the balance and move the cert to `pending` - all or
    /// nothing. A `commit` task is scheduled afterwards whether the charge
    /// succeeded or not, so the vendor submission retries asynchronously.
    pub async fn charge(
        &self,
        actor: Actor,
        order_id: i64,
        create_commit_task: bool,
    ) -> Result<ChargeOutcome, OrderError> {
        let result = self.charge_inner(actor, order_id).await;

        if create_commit_task {
            if let Err(e) = self
                .tasks
                .create_task(&[order_id], TaskAction::Commit, 0)
                .await
            {
                tracing::warn!("failed to schedule commit task for order {}: {}", order_id, e);
            }
        }

        match result {
            Ok(()) => Ok(ChargeOutcome {
                order_id,
                charged: true,
                message: None,
                errors: None,
            }),
            // A rejected charge is an outcome the caller inspects, not an
            // error that aborts the flow.
            Err(OrderError::Rejected { message, errors }) => Ok(ChargeOutcome {
                order_id,
                charged: false,
                message: Some(message),
                errors,
            }),
            Err(other) => Err(other),
        }
    }

    async fn charge_inner(&self, actor: Actor, order_id: i64) -> Result<(), OrderError> {
        let txn = self.db.begin().await?;

        let mut query = orders::Entity::find_by_id(order_id);
        if let Some(user_id) = actor.user_id {
            query = query.filter(orders::Column::UserId.eq(user_id));
        }
        if supports_row_locks(self.db.as_ref()) {
            query = query.lock_exclusive();
        }

        let order = query
            .one(&txn)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("order {}", order_id)))?;

        let cert = certs::Entity::find_by_id(order.latest_cert_id.unwrap_or_default())
            .one(&txn)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("order {} has no cert", order_id)))?;

        if CertStatus::from_str(&cert.status) != Ok(CertStatus::Unpaid) {
            return Err(OrderError::rejected("order is not unpaid"));
        }

        let user = users::Entity::find_by_id(order.user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("user {}", order.user_id)))?;

        let product = products::Entity::find_by_id(order.product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("product {}", order.product_id)))?;

        // Negative amount = charge.
        let amount = -cert.amount;
        let balance_after = user.balance + amount;

        // The floor only binds customer-initiated charges; operators may
        // push an account below its ceiling deliberately.
        if balance_after < user.credit_limit && actor.is_customer() {
            return Err(OrderError::rejected("insufficient balance"));
        }

        let purchased_standard = order
            .purchased_standard_count
            .max(cert.standard_count)
            .max(product.standard_min);
        let purchased_wildcard = order
            .purchased_wildcard_count
            .max(cert.wildcard_count)
            .max(product.wildcard_min);

        transactions::ActiveModel {
            user_id: Set(user.id),
            order_id: Set(order.id),
            kind: Set("order".to_string()),
            amount: Set(amount),
            standard_count: Set(purchased_standard - order.purchased_standard_count),
            wildcard_count: Set(purchased_wildcard - order.purchased_wildcard_count),
            remark: Set(Some(format!(
                "{} {} x{}m",
                cert.action, cert.common_name, order.period
            ))),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let mut user_update: users::ActiveModel = user.into();
        user_update.balance = Set(balance_after);
        user_update.update(&txn).await?;

        let mut order_update: orders::ActiveModel = order.into();
        order_update.purchased_standard_count = Set(purchased_standard);
        order_update.purchased_wildcard_count = Set(purchased_wildcard);
        order_update.update(&txn).await?;

        let mut cert_update: certs::ActiveModel = cert.into();
        cert_update.status = Set(CertStatus::Pending.as_str().to_string());
        cert_update.update(&txn).await?;

        txn.commit().await?;

        info!("charged order {} ({})", order_id, amount);
        Ok(())
    }

    /// Undo a paid-but-unsubmitted order: refund a fresh purchase, or roll
    /// a reissue back onto its previous cert.
    pub async fn cancel_pending(&self, actor: Actor, order_id: i64) -> Result<(), OrderError> {
        let bundle = self.load_bundle(actor, order_id).await?;
        let cert = bundle.cert.clone();

        let txn = self.db.begin().await?;

        if CertKind::from_str(&cert.action) == Ok(CertKind::Reissue) {
            if cert.amount > Decimal::ZERO {
                let last_transaction = transactions::Entity::find()
                    .filter(transactions::Column::OrderId.eq(order_id))
                    .order_by_desc(transactions::Column::Id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| OrderError::rejected("previous transaction not found"))?;

                if -cert.amount != last_transaction.amount {
                    return Err(OrderError::rejected("previous transaction amount mismatch"));
                }

                transactions::ActiveModel {
                    user_id: Set(bundle.order.user_id),
                    order_id: Set(order_id),
                    kind: Set("cancel".to_string()),
                    amount: Set(cert.amount),
                    standard_count: Set(-last_transaction.standard_count),
                    wildcard_count: Set(-last_transaction.wildcard_count),
                    remark: Set(Some(format!("cancel reissue {}", cert.common_name))),
                    ..Default::default()
                }
                .insert(&txn)
                .await?;

                self.refund_balance(&txn, bundle.order.user_id, cert.amount).await?;

                let mut order_update: orders::ActiveModel = bundle.order.clone().into();
                order_update.amount = Set(bundle.order.amount - cert.amount);
                order_update.purchased_standard_count = Set(bundle.order.purchased_standard_count
                    - last_transaction.standard_count);
                order_update.purchased_wildcard_count = Set(bundle.order.purchased_wildcard_count
                    - last_transaction.wildcard_count);
                order_update.latest_cert_id = Set(cert.last_cert_id);
                order_update.update(&txn).await?;
            } else {
                let mut order_update: orders::ActiveModel = bundle.order.clone().into();
                order_update.latest_cert_id = Set(cert.last_cert_id);
                order_update.update(&txn).await?;
            }

            let last_cert_id = cert
                .last_cert_id
                .ok_or_else(|| OrderError::rejected("previous certificate not found"))?;
            let last_cert = certs::Entity::find_by_id(last_cert_id)
                .one(&txn)
                .await?
                .ok_or_else(|| OrderError::rejected("previous certificate not found"))?;

            let mut last_update: certs::ActiveModel = last_cert.into();
            last_update.status = Set(CertStatus::Active.as_str().to_string());
            last_update.update(&txn).await?;

            certs::Entity::delete_by_id(cert.id).exec(&txn).await?;
        } else {
            transactions::ActiveModel {
                user_id: Set(bundle.order.user_id),
                order_id: Set(order_id),
                kind: Set("cancel".to_string()),
                amount: Set(bundle.order.amount),
                standard_count: Set(-bundle.order.purchased_standard_count),
                wildcard_count: Set(-bundle.order.purchased_wildcard_count),
                remark: Set(Some(format!("cancel {}", cert.common_name))),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            self.refund_balance(&txn, bundle.order.user_id, bundle.order.amount).await?;

            let mut order_update: orders::ActiveModel = bundle.order.clone().into();
            order_update.purchased_standard_count = Set(0);
            order_update.purchased_wildcard_count = Set(0);
            order_update.update(&txn).await?;

            let mut cert_update: certs::ActiveModel = cert.into();
            cert_update.status = Set(CertStatus::Cancelled.as_str().to_string());
            cert_update.update(&txn).await?;
        }

        txn.commit().await?;

        self.tasks
            .delete_task(&[order_id], &[TaskAction::Commit])
            .await?;

        Ok(())
    }

    /// Remove an unpaid cert entirely, restoring the chained previous cert
    /// when the action was a renew/reissue, or pruning the order for a
    /// fresh purchase.
    pub async fn delete(&self, actor: Actor, order_id: i64) -> Result<(), OrderError> {
        let bundle = self.load_bundle(actor, order_id).await?;
        let cert = bundle.cert.clone();

        if CertStatus::from_str(&cert.status) != Ok(CertStatus::Unpaid) {
            return Err(OrderError::rejected("only unpaid certificates can be deleted"));
        }

        let txn = self.db.begin().await?;

        match cert.last_cert_id {
            Some(last_cert_id) => {
                let last_cert = certs::Entity::find_by_id(last_cert_id)
                    .one(&txn)
                    .await?
                    .ok_or_else(|| OrderError::rejected("previous certificate not found"))?;

                let mut last_update: certs::ActiveModel = last_cert.into();
                last_update.status = Set(CertStatus::Active.as_str().to_string());
                last_update.update(&txn).await?;

                let mut order_update: orders::ActiveModel = bundle.order.clone().into();
                order_update.latest_cert_id = Set(Some(last_cert_id));
                order_update.amount = Set(bundle.order.amount - cert.amount);
                order_update.update(&txn).await?;

                certs::Entity::delete_by_id(cert.id).exec(&txn).await?;
            }
            None => {
                // Break the pointer before the rows go away.
                let mut order_update: orders::ActiveModel = bundle.order.clone().into();
                order_update.latest_cert_id = Set(None);
                order_update.update(&txn).await?;

                certs::Entity::delete_by_id(cert.id).exec(&txn).await?;
                orders::Entity::delete_by_id(order_id).exec(&txn).await?;
            }
        }

        txn.commit().await?;

        self.tasks
            .delete_task(&[order_id], &[TaskAction::Commit])
            .await?;

        Ok(())
    }

    /// Ledger side of a completed cancellation/revocation: refund the
    /// order when entitled, zero the counters and land the cert on its
    /// terminal status.
    pub(crate) async fn settle_cancellation(
        &self,
        bundle: &crate::service::OrderBundle,
        terminal: CertStatus,
        refund: bool,
    ) -> Result<(), OrderError> {
        let txn = self.db.begin().await?;

        if refund && bundle.order.amount > Decimal::ZERO {
            transactions::ActiveModel {
                user_id: Set(bundle.order.user_id),
                order_id: Set(bundle.order.id),
                kind: Set("cancel".to_string()),
                amount: Set(bundle.order.amount),
                standard_count: Set(-bundle.order.purchased_standard_count),
                wildcard_count: Set(-bundle.order.purchased_wildcard_count),
                remark: Set(Some(format!("{} {}", terminal, bundle.cert.common_name))),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            self.refund_balance(&txn, bundle.order.user_id, bundle.order.amount).await?;

            let mut order_update: orders::ActiveModel = bundle.order.clone().into();
            order_update.purchased_standard_count = Set(0);
            order_update.purchased_wildcard_count = Set(0);
            order_update.update(&txn).await?;
        }

        let mut cert_update: certs::ActiveModel = bundle.cert.clone().into();
        cert_update.status = Set(terminal.as_str().to_string());
        cert_update.update(&txn).await?;

        txn.commit().await?;

        Ok(())
    }

    async fn refund_balance(
        &self,
        txn: &DatabaseTransaction,
        user_id: i64,
        amount: Decimal,
    ) -> Result<(), OrderError> {
        let user = users::Entity::find_by_id(user_id)
            .one(txn)
            .await?
            .ok_or_else(|| OrderError::NotFound(format!("user {}", user_id)))?;

        let balance = user.balance + amount;
        let mut update: users::ActiveModel = user.into();
        update.balance = Set(balance);
        update.update(txn).await?;

        Ok(())
    }
}
