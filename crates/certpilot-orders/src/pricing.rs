//! Order pricing from the product cost table. The base price covers the
//! product's minimum SAN counts; additional names are priced per SAN for
//! the chosen period.

use rust_decimal::Decimal;
use std::str::FromStr;

use certpilot_entities::products;

fn price_for(cost: &serde_json::Value, table: &str, period: i32) -> Decimal {
    cost.get(table)
        .and_then(|t| t.get(period.to_string()))
        .and_then(|v| match v {
            serde_json::Value::String(s) => Decimal::from_str(s).ok(),
            serde_json::Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
            _ => None,
        })
        .unwrap_or(Decimal::ZERO)
}

/// Full price of a new or renewed cert.
pub fn order_amount(
    product: &products::Model,
    period: i32,
    standard_count: i32,
    wildcard_count: i32,
) -> Decimal {
    let base = price_for(&product.cost, "price", period);
    let extra_standard = (standard_count - product.standard_min).max(0);
    let extra_wildcard = (wildcard_count - product.wildcard_min).max(0);

    base + Decimal::from(extra_standard) * price_for(&product.cost, "alternative_standard_price", period)
        + Decimal::from(extra_wildcard)
            * price_for(&product.cost, "alternative_wildcard_price", period)
}

/// Incremental price of a reissue: only SANs beyond what the order already
/// paid for cost anything.
pub fn reissue_amount(
    product: &products::Model,
    period: i32,
    purchased_standard: i32,
    purchased_wildcard: i32,
    standard_count: i32,
    wildcard_count: i32,
) -> Decimal {
    let covered_standard = purchased_standard.max(product.standard_min);
    let covered_wildcard = purchased_wildcard.max(product.wildcard_min);

    let extra_standard = (standard_count - covered_standard).max(0);
    let extra_wildcard = (wildcard_count - covered_wildcard).max(0);

    Decimal::from(extra_standard) * price_for(&product.cost, "alternative_standard_price", period)
        + Decimal::from(extra_wildcard)
            * price_for(&product.cost, "alternative_wildcard_price", period)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn product(cost: serde_json::Value) -> products::Model {
        products::Model {
            id: 1,
            code: "p".to_string(),
            name: "p".to_string(),
            api_id: "1".to_string(),
            source: "racent".to_string(),
            brand: "sectigo".to_string(),
            ca: "sectigo".to_string(),
            validation_type: "dv".to_string(),
            common_name_types: json!(["standard"]),
            alternative_name_types: json!(["standard"]),
            validation_methods: json!(["cname"]),
            periods: json!([12]),
            encryption_alg: json!(["rsa"]),
            signature_digest_alg: json!(["sha256"]),
            standard_min: 1,
            standard_max: 10,
            wildcard_min: 0,
            wildcard_max: 10,
            total_min: 1,
            total_max: 20,
            add_san: true,
            replace_san: true,
            reissue: true,
            renew: true,
            reuse_csr: false,
            gift_root_domain: false,
            refund_period: 30,
            cost,
            weight: 0,
            status: 1,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn base_price_covers_minimums() {
        let product = product(json!({
            "price": {"12": "100.00"},
            "alternative_standard_price": {"12": "20.00"},
            "alternative_wildcard_price": {"12": "80.00"},
        }));

        assert_eq!(order_amount(&product, 12, 1, 0), Decimal::from_str("100.00").unwrap());
        assert_eq!(order_amount(&product, 12, 3, 1), Decimal::from_str("220.00").unwrap());
    }

    #[test]
    fn missing_period_prices_zero() {
        let product = product(json!({"price": {"12": "100.00"}}));
        assert_eq!(order_amount(&product, 24, 1, 0), Decimal::ZERO);
    }

    #[test]
    fn reissue_prices_only_added_sans() {
        let product = product(json!({
            "price": {"12": "100.00"},
            "alternative_standard_price": {"12": "20.00"},
            "alternative_wildcard_price": {"12": "80.00"},
        }));

        // Already paid for 2 standard names; reissuing with the same set
        // costs nothing.
        assert_eq!(reissue_amount(&product, 12, 2, 0, 2, 0), Decimal::ZERO);
        // Adding one standard and one wildcard name.
        assert_eq!(
            reissue_amount(&product, 12, 2, 0, 3, 1),
            Decimal::from_str("100.00").unwrap()
        );
    }
}
