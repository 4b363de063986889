//! Helpers registered on both the text and the HTML registry.

use alertpush_common::types::KV;
use chrono::{DateTime, Utc};
use handlebars::{handlebars_helper, Handlebars};
use serde_json::{Map, Value};

fn to_kv(map: &Map<String, Value>) -> KV {
    map.iter()
        .map(|(k, v)| {
            let v = match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            (k.clone(), v)
        })
        .collect()
}

fn kv_to_object(kv: &KV) -> Value {
    Value::Object(
        kv.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect(),
    )
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Formats a duration as e.g. `2h 5m 3s`.
pub fn humanize_duration(d: chrono::Duration) -> String {
    let total = d.num_seconds().max(0);
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    if h > 0 {
        format!("{h}h {m}m {s}s")
    } else if m > 0 {
        format!("{m}m {s}s")
    } else {
        format!("{s}s")
    }
}

handlebars_helper!(to_upper: |s: str| s.to_uppercase());
handlebars_helper!(to_lower: |s: str| s.to_lowercase());
handlebars_helper!(title_case_helper: |s: str| title_case(s));

handlebars_helper!(join: |items: array, sep: str| {
    items
        .iter()
        .map(|v| match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(sep)
});

handlebars_helper!(sorted_pairs: |labels: object| {
    serde_json::to_value(to_kv(labels).sorted_pairs()).unwrap_or(Value::Null)
});

// Keys are comma separated: `(removeKeys labels "alertname,severity")`.
handlebars_helper!(remove_keys: |labels: object, keys: str| {
    let keys: Vec<&str> = keys.split(',').map(str::trim).filter(|k| !k.is_empty()).collect();
    kv_to_object(&to_kv(labels).remove(&keys))
});

handlebars_helper!(date: |ts: str, fmt: str| {
    match DateTime::parse_from_rfc3339(ts) {
        Ok(t) => t.with_timezone(&Utc).format(fmt).to_string(),
        Err(_) => ts.to_string(),
    }
});

handlebars_helper!(since: |ts: str| {
    match DateTime::parse_from_rfc3339(ts) {
        Ok(t) => humanize_duration(Utc::now() - t.with_timezone(&Utc)),
        Err(_) => String::new(),
    }
});

pub fn register(reg: &mut Handlebars<'static>) {
    reg.register_helper("toUpper", Box::new(to_upper));
    reg.register_helper("toLower", Box::new(to_lower));
    reg.register_helper("titleCase", Box::new(title_case_helper));
    reg.register_helper("join", Box::new(join));
    reg.register_helper("sortedPairs", Box::new(sorted_pairs));
    reg.register_helper("removeKeys", Box::new(remove_keys));
    reg.register_helper("date", Box::new(date));
    reg.register_helper("since", Box::new(since));
}
