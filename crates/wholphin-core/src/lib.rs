//! Core domain model for the Wholphin reporting backend.
//!
//! Everything in this crate is pure: field-name normalization, join-key
//! sanitization, lenient scalar coercion, and the typed row structs the
//! loader binds. No I/O.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CRATE_NAME: &str = "wholphin-core";

/// A single record fetched from the central API (or read from the target
/// spreadsheet), keyed by normalized field names. Values pass through
/// untouched; missing or garbage fields are the consumer's problem.
pub type RemoteRecord = BTreeMap<String, Value>;

/// The three datasets served by the central API, in mandated fetch order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Orders,
    Sales,
    Revenue,
}

impl Dataset {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Orders => "orders",
            Dataset::Sales => "sales",
            Dataset::Revenue => "revenue",
        }
    }
}

impl std::fmt::Display for Dataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical form for a field name: trimmed, internal whitespace runs
/// collapsed to a single underscore, lowercased.
pub fn normalize_field_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join("_").to_lowercase()
}

/// Normalize every key of a decoded JSON object into a [`RemoteRecord`].
pub fn normalize_record(object: &serde_json::Map<String, Value>) -> RemoteRecord {
    object
        .iter()
        .map(|(key, value)| (normalize_field_name(key), value.clone()))
        .collect()
}

/// Strip every non-digit character from an identifier ("2-1008" becomes
/// "21008"). An input with no digits yields `None`.
pub fn sanitize_id(raw: &str) -> Option<String> {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        None
    } else {
        Some(digits)
    }
}

/// [`sanitize_id`] lifted over a loosely-typed record value. Numbers are
/// sanitized through their decimal rendering; anything else is no id.
pub fn sanitize_id_value(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => sanitize_id(s),
        Value::Number(n) => sanitize_id(&n.to_string()),
        _ => None,
    }
}

/// A record field as text. Strings are trimmed (empty means absent);
/// numbers and booleans keep their textual form.
pub fn text_field(record: &RemoteRecord, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::Null => None,
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        other => Some(other.to_string()),
    }
}

/// A record field as a float, tolerating numeric strings.
pub fn number_field(record: &RemoteRecord, key: &str) -> Option<f64> {
    match record.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// A YYYYMM reporting bucket, tolerating both integer and string cells
/// (spreadsheet readers hand periods back as floats).
pub fn periode_field(record: &RemoteRecord, key: &str) -> Option<i32> {
    match record.get(key)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .and_then(|v| i32::try_from(v).ok()),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// One row bound into the `orders` table. Orders are inserted
/// unconditionally; a null `order_id` simply never joins.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRow {
    pub order_id: Option<String>,
    pub li_sid: Option<String>,
    pub ca_account_name: Option<String>,
    pub quote_subtype: Option<String>,
    pub li_milestone: Option<String>,
    pub order_created_date: Option<String>,
    pub billing_activation_date: Option<String>,
    pub agree_end_date: Option<String>,
    pub agree_status: Option<String>,
    pub sa_witel: Option<String>,
    pub quote_createdby_name: Option<String>,
    pub product_name: Option<String>,
    pub bw: Option<String>,
}

impl OrderRow {
    pub fn from_record(record: &RemoteRecord) -> Self {
        Self {
            order_id: sanitize_id_value(record.get("order_id")),
            li_sid: text_field(record, "li_sid"),
            ca_account_name: text_field(record, "ca_account_name"),
            quote_subtype: text_field(record, "quote_subtype"),
            li_milestone: text_field(record, "li_milestone"),
            order_created_date: text_field(record, "order_created_date"),
            billing_activation_date: text_field(record, "billing_activation_date"),
            agree_end_date: text_field(record, "agree_end_date"),
            agree_status: text_field(record, "agree_status"),
            sa_witel: text_field(record, "sa_witel"),
            quote_createdby_name: text_field(record, "quote_createdby_name"),
            // the upstream order feed names this column after the line item
            product_name: text_field(record, "li_product_name"),
            bw: text_field(record, "bw"),
        }
    }
}

/// One row bound into `monthly_revenues`, already joined to an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RevenueRow {
    pub cust_order_number: String,
    pub periode: Option<i32>,
    pub revenue: Option<f64>,
}

impl RevenueRow {
    pub fn from_record(record: &RemoteRecord, cust_order_number: String) -> Self {
        Self {
            cust_order_number,
            periode: periode_field(record, "periode"),
            revenue: number_field(record, "revenue"),
        }
    }
}

/// One row bound into `sales_data`, already joined to an order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SalesRow {
    pub cust_order_number: String,
    pub product_label: Option<String>,
    pub product_group_name: Option<String>,
    pub lccd: Option<String>,
    pub regional: Option<String>,
    pub witel: Option<String>,
    pub sales_type: Option<String>,
    pub sales_amount: Option<f64>,
}

impl SalesRow {
    pub fn from_record(record: &RemoteRecord, cust_order_number: String) -> Self {
        Self {
            cust_order_number,
            product_label: text_field(record, "product_label"),
            product_group_name: text_field(record, "product_group_name"),
            lccd: text_field(record, "lccd"),
            regional: text_field(record, "regional"),
            witel: text_field(record, "witel"),
            sales_type: text_field(record, "sales_type"),
            sales_amount: number_field(record, "sales_amount"),
        }
    }
}

/// One row bound into `targets`. Target rows carry no foreign key and are
/// inserted unconditionally; their own identifiers are never sanitized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TargetRow {
    pub periode: Option<i32>,
    pub regional: Option<String>,
    pub witel: Option<String>,
    pub customer_type: Option<String>,
    pub target: Option<f64>,
    pub target_rkapp: Option<f64>,
}

impl TargetRow {
    pub fn from_record(record: &RemoteRecord) -> Self {
        Self {
            periode: periode_field(record, "periode"),
            regional: text_field(record, "regional"),
            witel: text_field(record, "witel"),
            customer_type: text_field(record, "customer_type"),
            target: number_field(record, "target"),
            target_rkapp: number_field(record, "target_rkapp"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(value: Value) -> RemoteRecord {
        let object = value.as_object().expect("test record must be an object");
        normalize_record(object)
    }

    #[test]
    fn field_names_are_trimmed_collapsed_and_lowercased() {
        assert_eq!(normalize_field_name("  Customer  Type "), "customer_type");
        assert_eq!(normalize_field_name("ORDER_ID"), "order_id");
        assert_eq!(normalize_field_name("Target\tRKAPP"), "target_rkapp");
        assert_eq!(normalize_field_name("periode"), "periode");
    }

    #[test]
    fn normalized_records_never_keep_internal_whitespace() {
        let rec = record(json!({" Cust Order Number ": "2-1008", "Revenue": 5.0}));
        for key in rec.keys() {
            assert_eq!(key, &key.to_lowercase());
            assert!(!key.contains(char::is_whitespace), "key {key:?} kept whitespace");
        }
        assert!(rec.contains_key("cust_order_number"));
    }

    #[test]
    fn sanitize_keeps_digits_in_original_order() {
        assert_eq!(sanitize_id("2-1008"), Some("21008".to_string()));
        assert_eq!(sanitize_id("MO-9/9999"), Some("99999".to_string()));
        assert_eq!(sanitize_id("21008"), Some("21008".to_string()));
    }

    #[test]
    fn sanitize_of_empty_or_digitless_input_is_none() {
        assert_eq!(sanitize_id(""), None);
        assert_eq!(sanitize_id("N/A"), None);
        assert_eq!(sanitize_id_value(None), None);
        assert_eq!(sanitize_id_value(Some(&Value::Null)), None);
        assert_eq!(sanitize_id_value(Some(&json!(""))), None);
    }

    #[test]
    fn sanitize_accepts_numeric_identifiers() {
        assert_eq!(sanitize_id_value(Some(&json!(21008))), Some("21008".to_string()));
    }

    #[test]
    fn text_coercion_trims_and_renders_scalars() {
        let rec = record(json!({"witel": "  Semarang ", "bw": 100, "flag": true, "gone": null}));
        assert_eq!(text_field(&rec, "witel"), Some("Semarang".to_string()));
        assert_eq!(text_field(&rec, "bw"), Some("100".to_string()));
        assert_eq!(text_field(&rec, "flag"), Some("true".to_string()));
        assert_eq!(text_field(&rec, "gone"), None);
        assert_eq!(text_field(&rec, "absent"), None);
    }

    #[test]
    fn numeric_coercion_tolerates_strings() {
        let rec = record(json!({"revenue": "1200.5", "target": 7, "periode": 202506.0}));
        assert_eq!(number_field(&rec, "revenue"), Some(1200.5));
        assert_eq!(number_field(&rec, "target"), Some(7.0));
        assert_eq!(periode_field(&rec, "periode"), Some(202506));
    }

    #[test]
    fn order_row_sanitizes_its_identifier() {
        let rec = record(json!({
            "ORDER_ID": "2-1008",
            "CA_ACCOUNT_NAME": "PT Example",
            "LI_PRODUCT_NAME": "Metro Ethernet"
        }));
        let row = OrderRow::from_record(&rec);
        assert_eq!(row.order_id, Some("21008".to_string()));
        assert_eq!(row.ca_account_name, Some("PT Example".to_string()));
        assert_eq!(row.product_name, Some("Metro Ethernet".to_string()));
        assert_eq!(row.li_sid, None);
    }
}
