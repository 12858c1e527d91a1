//! Maps raw source items onto [`IngestedRecord`]. Pure: no I/O.

use chrono::{DateTime, NaiveDate, Utc};
use dealscan_core::{DealMetrics, IngestedRecord, Source};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::SourceItem;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NormalizeError {
    #[error("item is not a JSON object")]
    NotAnObject,
    #[error("item has no usable `{0}`")]
    MissingExternalId(&'static str),
}

/// Key names of one source family's raw item schema.
struct ItemSchema {
    id: &'static str,
    name: &'static str,
    url: &'static str,
    quantity_sold: &'static str,
    net_revenue: Option<&'static str>,
    margin: Option<&'static str>,
    price: &'static str,
    start_at: Option<&'static str>,
    end_at: &'static str,
}

const COMPETITOR_SCHEMA: ItemSchema = ItemSchema {
    id: "id",
    name: "title",
    url: "url",
    quantity_sold: "sold",
    net_revenue: None,
    margin: None,
    price: "price",
    start_at: None,
    end_at: "endsAt",
};

const PARTNER_SCHEMA: ItemSchema = ItemSchema {
    id: "dealId",
    name: "title",
    url: "url",
    quantity_sold: "quantitySold",
    net_revenue: Some("netRevenue"),
    margin: Some("margin"),
    price: "price",
    start_at: Some("startAt"),
    end_at: "endAt",
};

fn schema_for(source: Source) -> &'static ItemSchema {
    match source {
        Source::Dealpulse | Source::Citybuys => &COMPETITOR_SCHEMA,
        Source::Partner => &PARTNER_SCHEMA,
    }
}

/// Normalize one raw item. Malformed metrics become `0`; only a missing
/// identity fails the item.
pub fn normalize(item: &SourceItem, source: Source) -> Result<IngestedRecord, NormalizeError> {
    let obj = item.as_object().ok_or(NormalizeError::NotAnObject)?;
    let schema = schema_for(source);

    let external_id =
        identity(obj.get(schema.id)).ok_or(NormalizeError::MissingExternalId(schema.id))?;
    let name = text(obj.get(schema.name))
        .unwrap_or_else(|| format!("{} deal {}", source.display_name(), external_id));

    let metrics = DealMetrics {
        quantity_sold: coerce_i64(obj.get(schema.quantity_sold)),
        net_revenue: optional_f64(obj, schema.net_revenue),
        margin: optional_f64(obj, schema.margin),
        price: coerce_f64(obj.get(schema.price)),
    };

    Ok(IngestedRecord {
        source,
        external_id,
        name,
        metrics,
        url: text(obj.get(schema.url)),
        start_at: schema.start_at.and_then(|key| timestamp(obj.get(key))),
        end_at: timestamp(obj.get(schema.end_at)),
    })
}

fn identity(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::String(s) => text_or_none(s),
        JsonValue::Number(n) => Some(
            n.as_u64()
                .map(|v| v.to_string())
                .or_else(|| n.as_i64().map(|v| v.to_string()))
                .unwrap_or_else(|| n.to_string()),
        ),
        _ => None,
    }
}

fn text(value: Option<&JsonValue>) -> Option<String> {
    value?.as_str().and_then(text_or_none)
}

fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn optional_f64(obj: &Map<String, JsonValue>, key: Option<&'static str>) -> f64 {
    key.map(|k| coerce_f64(obj.get(k))).unwrap_or(0.0)
}

fn coerce_f64(value: Option<&JsonValue>) -> f64 {
    let parsed = match value {
        Some(JsonValue::Number(n)) => n.as_f64(),
        Some(JsonValue::String(s)) => parse_loose_number(s),
        _ => None,
    };
    parsed.filter(|v| v.is_finite()).unwrap_or(0.0)
}

fn coerce_i64(value: Option<&JsonValue>) -> i64 {
    match value {
        Some(JsonValue::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v.trunc() as i64))
            .unwrap_or(0),
        Some(JsonValue::String(s)) => parse_loose_number(s)
            .filter(|v| v.is_finite())
            .map(|v| v.trunc() as i64)
            .unwrap_or(0),
        _ => 0,
    }
}

/// First number in free text such as `"1,204 bought"`, `"$39.00"`, `"$.99"` or `"-4.5%"`.
/// Thousands separators are ignored.
pub fn parse_loose_number(text: &str) -> Option<f64> {
    let cleaned = text.replace(',', "");
    let chars = cleaned.chars().collect::<Vec<_>>();
    let mut current = String::new();
    let mut seen_dot = false;
    let digit_at = |i: usize| chars.get(i).is_some_and(|c| c.is_ascii_digit());

    for (idx, &ch) in chars.iter().enumerate() {
        if ch.is_ascii_digit() {
            current.push(ch);
            continue;
        }
        if ch == '.' && !seen_dot {
            let has_digits = !current.is_empty() && current != "-";
            let leads_digits = digit_at(idx + 1);
            if has_digits || leads_digits {
                if !has_digits {
                    current.push('0');
                }
                current.push(ch);
                seen_dot = true;
                continue;
            }
        }
        if ch == '-'
            && current.is_empty()
            && (digit_at(idx + 1) || (chars.get(idx + 1) == Some(&'.') && digit_at(idx + 2)))
        {
            current.push(ch);
            continue;
        }
        if !current.is_empty() {
            break;
        }
    }

    current.trim_end_matches('.').parse::<f64>().ok()
}

fn timestamp(value: Option<&JsonValue>) -> Option<DateTime<Utc>> {
    let raw = value?.as_str()?.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn partner_item_maps_all_metrics() {
        let item = json!({
            "dealId": 42,
            "title": "Wine tasting for two",
            "url": "https://partner.example/deals/42",
            "quantitySold": 10,
            "netRevenue": 412.5,
            "margin": "18.5%",
            "price": 49,
            "startAt": "2026-10-01T00:00:00Z",
            "endAt": "2026-12-31"
        });
        let record = normalize(&item, Source::Partner).unwrap();
        assert_eq!(record.external_id, "42");
        assert_eq!(record.name, "Wine tasting for two");
        assert_eq!(
            record.metrics,
            DealMetrics {
                quantity_sold: 10,
                net_revenue: 412.5,
                margin: 18.5,
                price: 49.0,
            }
        );
        assert_eq!(
            record.start_at,
            Some(Utc.with_ymd_and_hms(2026, 10, 1, 0, 0, 0).unwrap())
        );
        assert_eq!(
            record.end_at,
            Some(Utc.with_ymd_and_hms(2026, 12, 31, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn competitor_text_metrics_are_parsed() {
        let item = json!({
            "id": "dp-101",
            "title": "Sunset kayak tour",
            "sold": "1,204 bought",
            "price": "$39.00"
        });
        let record = normalize(&item, Source::Dealpulse).unwrap();
        assert_eq!(record.metrics.quantity_sold, 1204);
        assert_eq!(record.metrics.price, 39.0);
        assert_eq!(record.metrics.net_revenue, 0.0);
        assert_eq!(record.metrics.margin, 0.0);
        assert!(record.url.is_none());
    }

    #[test]
    fn malformed_numbers_coerce_to_zero() {
        let item = json!({
            "dealId": "x-1",
            "quantitySold": "lots",
            "netRevenue": null,
            "margin": {"value": 3},
            "price": [1, 2]
        });
        let record = normalize(&item, Source::Partner).unwrap();
        assert_eq!(record.metrics, DealMetrics::default());
        assert_eq!(record.name, "Partner platform deal x-1");
    }

    #[test]
    fn missing_or_blank_identity_is_an_item_error() {
        assert_eq!(
            normalize(&json!({ "title": "No id" }), Source::Partner),
            Err(NormalizeError::MissingExternalId("dealId"))
        );
        assert_eq!(
            normalize(&json!({ "id": "   " }), Source::Citybuys),
            Err(NormalizeError::MissingExternalId("id"))
        );
        assert_eq!(
            normalize(&json!("just a string"), Source::Citybuys),
            Err(NormalizeError::NotAnObject)
        );
    }

    #[test]
    fn loose_numbers() {
        assert_eq!(parse_loose_number("1,200+ bought"), Some(1200.0));
        assert_eq!(parse_loose_number("$19.99"), Some(19.99));
        assert_eq!(parse_loose_number("margin -4.5%"), Some(-4.5));
        assert_eq!(parse_loose_number("2-for-1"), Some(2.0));
        assert_eq!(parse_loose_number("$.99"), Some(0.99));
        assert_eq!(parse_loose_number("-.5 pts"), Some(-0.5));
        assert_eq!(parse_loose_number("v. 3"), Some(3.0));
        assert_eq!(parse_loose_number("ends 3."), Some(3.0));
        assert_eq!(parse_loose_number("sold out"), None);
        assert_eq!(parse_loose_number("-"), None);
    }
}
