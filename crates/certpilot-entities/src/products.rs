use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait};
use serde::{Deserialize, Serialize};
use certpilot_core::DBDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    #[sea_orm(unique)]
    pub code: String,
    pub name: String,
    /// Product identifier on the vendor side.
    pub api_id: String,
    /// Vendor adapter key this product is fulfilled through.
    pub source: String,
    pub brand: String,
    pub ca: String,
    /// dv / ov / ev
    pub validation_type: String,
    /// Allowed domain types for the common name, e.g. ["standard","wildcard"].
    pub common_name_types: Json,
    pub alternative_name_types: Json,
    pub validation_methods: Json,
    /// Allowed periods in months.
    pub periods: Json,
    pub encryption_alg: Json,
    pub signature_digest_alg: Json,
    pub standard_min: i32,
    pub standard_max: i32,
    pub wildcard_min: i32,
    pub wildcard_max: i32,
    pub total_min: i32,
    pub total_max: i32,
    pub add_san: bool,
    pub replace_san: bool,
    pub reissue: bool,
    pub renew: bool,
    pub reuse_csr: bool,
    pub gift_root_domain: bool,
    /// Days during which a cancellation is refunded.
    pub refund_period: i32,
    /// price / alternative_standard_price / alternative_wildcard_price,
    /// each keyed by period.
    pub cost: Json,
    pub weight: i32,
    pub status: i32,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::orders::Entity")]
    Orders,
}

impl Related<super::orders::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Orders.def()
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
        } else {
            self.updated_at = Set(now);
        }

        Ok(self)
    }
}
