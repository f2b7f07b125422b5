//! Plain-text rendering of permit records.
//!
//! Formatting never fails: every field has a fallback, so one odd record
//! cannot sink a whole result page.

use arcgis_feature::Feature;
use serde_json::Value;

use crate::filter::millis_to_date;

const NOT_AVAILABLE: &str = "N/A";
const DESCRIPTION_LIMIT: usize = 200;

/// Render one permit as a fixed block of `Label: value` lines ending in `---`.
pub fn format_permit(permit: &Feature) -> String {
    let lines = [
        ("Permit", text_field(permit, "CaseNumber")),
        ("Address", text_field(permit, "Address")),
        ("Neighborhood", text_field(permit, "Neighborhood")),
        ("Issued", date_field(permit, "IssuedDate")),
        ("Expires", date_field(permit, "ExpirationDate")),
        ("Cost", cost_field(permit, "Cost")),
        ("Description", description_field(permit, "Description")),
        ("Block/Lot", text_field(permit, "BLOCKLOT")),
        ("Council District", text_field(permit, "Council_District")),
        ("Existing Use", text_field(permit, "ExistingUse")),
        ("Proposed Use", text_field(permit, "ProposedUse")),
        ("Location", location(permit)),
        ("Modification", yes_no(permit, "IsPermitModification")),
    ];

    let mut block = String::new();
    for (label, value) in lines {
        block.push_str(label);
        block.push_str(": ");
        block.push_str(&value);
        block.push('\n');
    }
    block.push_str("---");
    block
}

/// Render several permits separated by blank lines.
pub fn format_permits<'a, I>(permits: I) -> String
where
    I: IntoIterator<Item = &'a Feature>,
{
    permits
        .into_iter()
        .map(format_permit)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn raw_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::String(s) => s.trim().is_empty(),
        Value::Null => true,
        _ => false,
    }
}

fn is_zero(value: &Value) -> bool {
    value.as_f64() == Some(0.0)
}

fn text_field(permit: &Feature, key: &str) -> String {
    permit
        .property(key)
        .filter(|value| !is_blank(value))
        .map(raw_text)
        .unwrap_or_else(|| NOT_AVAILABLE.to_owned())
}

fn date_field(permit: &Feature, key: &str) -> String {
    let Some(value) = permit
        .property(key)
        .filter(|value| !is_blank(value) && !is_zero(value))
    else {
        return NOT_AVAILABLE.to_owned();
    };

    let millis = value
        .as_i64()
        .or_else(|| value.as_f64().filter(|n| n.is_finite()).map(|n| n as i64));
    millis
        .and_then(millis_to_date)
        .map(|date| date.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| raw_text(value))
}

fn cost_field(permit: &Feature, key: &str) -> String {
    let Some(value) = permit
        .property(key)
        .filter(|value| !is_blank(value) && !is_zero(value))
    else {
        return NOT_AVAILABLE.to_owned();
    };

    let amount = match value {
        Value::String(s) => s.trim().replace(',', "").parse::<f64>().ok(),
        other => other.as_f64(),
    };
    let Some(amount) = amount.filter(|n| n.is_finite()) else {
        return raw_text(value);
    };
    // exact decimal rendering; large amounts must not saturate
    let rounded = format!("{amount:.0}");
    if rounded.trim_start_matches('-').bytes().all(|b| b == b'0') {
        return NOT_AVAILABLE.to_owned();
    }
    format!("${}", group_thousands(&rounded))
}

fn description_field(permit: &Feature, key: &str) -> String {
    let text = text_field(permit, key);
    if text.chars().count() <= DESCRIPTION_LIMIT {
        return text;
    }
    let mut truncated: String = text.chars().take(DESCRIPTION_LIMIT).collect();
    truncated.push_str("...");
    truncated
}

fn location(permit: &Feature) -> String {
    permit
        .point()
        .map(|(lon, lat)| format!("({lat:.6}, {lon:.6})"))
        .unwrap_or_default()
}

fn yes_no(permit: &Feature, key: &str) -> String {
    let flagged = match permit.property(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "true" | "t" | "yes" | "y" | "1"
        ),
        _ => false,
    };
    let answer = if flagged { "Yes" } else { "No" };
    answer.to_owned()
}

fn group_thousands(number: &str) -> String {
    let (negative, digits) = match number.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, number),
    };
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    if negative {
        grouped.push('-');
    }
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}
