use async_trait::async_trait;
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait};
use serde::{Deserialize, Serialize};
use certpilot_core::{md5_hex, DBDateTime};

/// One versioned certificate request/issuance. `csr_md5` is derived from
/// the CSR at insert and never changes afterwards.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "certs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub order_id: i64,
    /// Previous cert in the renew/reissue chain.
    pub last_cert_id: Option<i64>,
    /// new / renew / reissue
    pub action: String,
    pub channel: String,
    /// Idempotency key sent to the vendor; globally unique.
    #[sea_orm(unique)]
    pub refer_id: String,
    pub unique_value: Option<String>,
    /// The submitted request parameters, kept for audit.
    pub params: Option<Json>,
    /// Amount this cert contributed to the order.
    pub amount: Decimal,
    #[sea_orm(column_type = "Text")]
    pub csr: String,
    pub csr_md5: String,
    #[sea_orm(column_type = "Text", nullable)]
    pub private_key: Option<String>,
    pub common_name: String,
    /// Comma-joined SAN list, common name first.
    #[sea_orm(column_type = "Text")]
    pub alternative_names: String,
    pub standard_count: i32,
    pub wildcard_count: i32,
    /// Typed `Dcv` value object.
    pub dcv: Option<Json>,
    /// Typed `Vec<DomainValidation>`.
    pub validation: Option<Json>,
    pub status: String,
    pub cert_apply_status: i32,
    pub domain_verify_status: i32,
    pub org_verify_status: i32,
    /// Vendor-side order reference.
    pub api_id: Option<String>,
    pub issuer: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub cert: Option<String>,
    pub serial_number: Option<String>,
    pub fingerprint: Option<String>,
    pub encryption_alg: Option<String>,
    pub encryption_bits: Option<i32>,
    pub signature_digest_alg: Option<String>,
    pub issued_at: Option<DBDateTime>,
    pub expires_at: Option<DBDateTime>,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::orders::Entity",
        from = "Column::OrderId",
        to = "super::orders::Column::Id"
    )]
    Order,
    #[sea_orm(
        belongs_to = "Entity",
        from = "Column::LastCertId",
        to = "Column::Id"
    )]
    LastCert,
}

impl Related<super::orders::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Order.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();

        if insert {
            if self.created_at.is_not_set() {
                self.created_at = Set(now);
            }
            if self.updated_at.is_not_set() {
                self.updated_at = Set(now);
            }
            // Dedup key follows the CSR, whatever the caller set.
            if let sea_orm::ActiveValue::Set(ref csr) = self.csr {
                self.csr_md5 = Set(md5_hex(csr.as_bytes()));
            }
        } else {
            self.updated_at = Set(now);
        }

        Ok(self)
    }
}
