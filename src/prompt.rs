//! Prompt assembly for the language model.
//!
//! The prompt is four sections in a fixed order: instruction header, the
//! delimited data context, the question, and response guidance. The marker
//! strings below are read by the model and by anything inspecting prompts;
//! they must not change.

use crate::legacy::{CampaignWindow, SkuComparison};
use crate::schema::{CampaignSignal, NeutralContext, SkuSignal, NEUTRAL_CONTEXT_VERSION};
use crate::utils::round2;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt::Write;

pub const DATA_CONTEXT_BEGIN: &str = "DATA CONTEXT BEGIN";
pub const DATA_CONTEXT_END: &str = "DATA CONTEXT END";
pub const QUESTION_PREFIX: &str = "QUESTION: ";
pub const MALFORMED_CONTEXT_V1: &str = "MALFORMED_CONTEXT_V1";
pub const NO_METRICS: &str = "NO METRICS";
pub const PREVIEW_CHARS: usize = 140;

const INSTRUCTION_HEADER: &str = "You are a concise merchandising & inventory analyst. Use ONLY the provided data context; if it is missing or insufficient, say you need more data. Provide direct answers with supporting numeric evidence.";

const RESPONSE_GUIDANCE: &str = "\
RESPONSE FORMAT: Answer in short paragraphs or bullet points. When comparing several SKUs or campaigns, include a markdown table with a header row.
CONFIDENCE: If confidence is low (thin sample <20 units, few observed days, or sparse campaigns) state that clearly.
DISCLAIMER: The data context contains neutral descriptive statistics only. Do not present them as forecasts, and note that decisions should be validated against full business records.";

/// Builds the complete prompt for `question` over an arbitrary context value.
pub fn build_prompt(question: &str, context: &Value) -> String {
    assemble(question, &format_context(context))
}

/// Builds the prompt directly from a typed context.
pub fn build_prompt_for_context(question: &str, context: &NeutralContext) -> String {
    assemble(question, &format_neutral_context(context))
}

/// First [`PREVIEW_CHARS`] characters of the prompt followed by an ellipsis.
pub fn build_prompt_preview(question: &str, context: &Value) -> String {
    let prompt = build_prompt(question, context);
    let mut preview: String = prompt.chars().take(PREVIEW_CHARS).collect();
    preview.push_str("...");
    preview
}

fn assemble(question: &str, formatted: &str) -> String {
    format!(
        "{INSTRUCTION_HEADER}\n\n{DATA_CONTEXT_BEGIN}\n{formatted}\n{DATA_CONTEXT_END}\n\n{QUESTION_PREFIX}{question}\n{RESPONSE_GUIDANCE}"
    )
}

fn is_falsy(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Renders the data-context block for any value shape. Never fails.
pub fn format_context(raw: &Value) -> String {
    if is_falsy(raw) {
        return NO_METRICS.to_string();
    }

    match raw {
        Value::Object(map) => {
            if let Some(version) = map.get("version") {
                return format_versioned(version, map, raw);
            }
            if map.contains_key("sales") {
                return format_legacy_summary(map);
            }
            raw.to_string()
        }
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("ITEM_{}: {}", i + 1, display_value(item)))
            .collect::<Vec<_>>()
            .join("\n"),
        other => display_value(other),
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parses each array element on its own, skipping the ones that do not fit.
fn parse_each<T: DeserializeOwned>(items: &[Value]) -> Vec<T> {
    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}

fn format_versioned(version: &Value, map: &Map<String, Value>, raw: &Value) -> String {
    if version.as_u64() != Some(u64::from(NEUTRAL_CONTEXT_VERSION)) {
        return format!("UNSUPPORTED_CONTEXT_VERSION: {}\n{}", version, raw);
    }
    let (Some(Value::Array(signals)), Some(Value::Array(campaigns))) =
        (map.get("skuSignals"), map.get("campaigns"))
    else {
        return MALFORMED_CONTEXT_V1.to_string();
    };

    let sku_signals: Vec<SkuSignal> = parse_each(signals);
    let campaigns: Vec<CampaignSignal> = parse_each(campaigns);
    let generated_at = map.get("generatedAt").and_then(|v| match v {
        Value::String(s) => Some(
            DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc).to_rfc3339())
                .unwrap_or_else(|_| s.clone()),
        ),
        Value::Null => None,
        other => Some(other.to_string()),
    });
    let notes: Vec<String> = map
        .get("notes")
        .and_then(Value::as_array)
        .map(|notes| notes.iter().map(display_value).collect())
        .unwrap_or_default();

    render_v1(
        NEUTRAL_CONTEXT_VERSION,
        generated_at.as_deref(),
        &sku_signals,
        &campaigns,
        &notes,
    )
}

/// Line-oriented rendering of a version 1 context. Absent signals are left
/// out of a line; unbounded days of cover render as `unbounded`.
pub fn format_neutral_context(context: &NeutralContext) -> String {
    render_v1(
        context.version,
        Some(context.generated_at.to_rfc3339().as_str()),
        &context.sku_signals,
        &context.campaigns,
        context.notes.as_deref().unwrap_or_default(),
    )
}

fn render_v1(
    version: u32,
    generated_at: Option<&str>,
    sku_signals: &[SkuSignal],
    campaigns: &[CampaignSignal],
    notes: &[String],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "CONTEXT_VERSION: {}", version);
    if let Some(generated_at) = generated_at {
        let _ = writeln!(out, "GENERATED_AT: {}", generated_at);
    }
    let _ = writeln!(out, "WINDOW: trailing 14 days ending at latest observed date");

    let _ = writeln!(out, "SKU_SIGNALS ({}):", sku_signals.len());
    for signal in sku_signals {
        let _ = writeln!(out, "{}", sku_signal_line(signal));
    }

    let _ = write!(out, "CAMPAIGNS ({}):", campaigns.len());
    for campaign in campaigns {
        let _ = write!(out, "\n{}", campaign_signal_line(campaign));
    }

    if !notes.is_empty() {
        out.push_str("\nNOTES:");
        for note in notes {
            let _ = write!(out, "\n- {}", note);
        }
    }
    out
}

fn sku_signal_line(signal: &SkuSignal) -> String {
    let mut line = format!("SKU {}", signal.sku);
    if let Some(v) = &signal.velocity14 {
        let _ = write!(
            line,
            " velocity14_avg_units={} days_observed={}",
            v.avg_units, v.days_observed
        );
    }
    if let Some(rate) = signal.return_rate {
        let _ = write!(line, " return_rate={}", rate);
    }
    match signal.days_cover {
        Some(Some(days)) => {
            let _ = write!(line, " days_cover={}", days);
        }
        Some(None) => line.push_str(" days_cover=unbounded"),
        None => {}
    }
    line
}

fn campaign_signal_line(c: &CampaignSignal) -> String {
    format!(
        "CAMP \"{}\" spend={} attrib_rev={} roas={}",
        c.campaign, c.spend, c.attributed_revenue, c.roas
    )
}

const SUMMARY_TOP_N: usize = 5;
const DEFAULT_SUMMARY_WINDOW: &str = "14";

/// Comparative rendering for any object carrying `sales`. Sections whose
/// arrays are missing are skipped and a missing window reads as 14 days.
fn format_legacy_summary(map: &Map<String, Value>) -> String {
    let window = map
        .get("timeWindowDays")
        .filter(|v| !is_falsy(v))
        .map(display_value)
        .unwrap_or_else(|| DEFAULT_SUMMARY_WINDOW.to_string());
    let mut lines = vec![format!("TIME_WINDOW_DAYS: {}", window)];

    if let Some(Value::Array(items)) = map.get("sales").and_then(|sales| sales.get("skus")) {
        let skus: Vec<SkuComparison> = parse_each(items);

        let mut growth: Vec<&SkuComparison> = skus.iter().collect();
        growth.sort_by(|a, b| b.pct_change_revenue.total_cmp(&a.pct_change_revenue));
        lines.push("SALES_TOP_REVENUE_GROWTH:".to_string());
        lines.extend(growth.iter().take(SUMMARY_TOP_N).map(|s| sku_comparison_line(s)));

        let mut decline: Vec<&SkuComparison> = skus.iter().collect();
        decline.sort_by(|a, b| a.pct_change_revenue.total_cmp(&b.pct_change_revenue));
        lines.push("SALES_TOP_REVENUE_DECLINE:".to_string());
        lines.extend(decline.iter().take(SUMMARY_TOP_N).map(|s| sku_comparison_line(s)));
    }

    if let Some(Value::Array(items)) = map.get("campaigns") {
        let campaigns: Vec<CampaignWindow> = parse_each(items);

        let mut by_roas: Vec<&CampaignWindow> = campaigns.iter().collect();
        by_roas.sort_by(|a, b| b.roas.total_cmp(&a.roas));
        lines.push("CAMPAIGNS_BY_ROAS_DESC:".to_string());
        lines.extend(by_roas.iter().take(SUMMARY_TOP_N).map(|c| campaign_window_line(c)));

        let low: Vec<&&CampaignWindow> = by_roas
            .iter()
            .filter(|c| c.recent_spend > 0.0 && c.roas < 1.0)
            .take(SUMMARY_TOP_N)
            .collect();
        if !low.is_empty() {
            lines.push("CAMPAIGNS_LOW_ROAS:".to_string());
            lines.extend(low.iter().map(|c| campaign_window_line(c)));
        }
    }

    lines.join("\n")
}

fn sku_comparison_line(s: &SkuComparison) -> String {
    format!(
        "SKU {} revΔ%={} unitsΔ%={} last={}/{} prev={}/{}",
        s.sku,
        round2(s.pct_change_revenue),
        round2(s.pct_change_units),
        s.recent_revenue,
        s.recent_units,
        s.prior_revenue,
        s.prior_units
    )
}

fn campaign_window_line(c: &CampaignWindow) -> String {
    format!(
        "CAMP \"{}\" spend={} attrib_rev={} roas={} units={}",
        c.campaign, c.recent_spend, c.recent_attributed_revenue, c.roas, c.units
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Velocity14;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn valid_context() -> NeutralContext {
        NeutralContext {
            version: 1,
            generated_at: Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
            sku_signals: vec![
                SkuSignal {
                    sku: "SKU1".to_string(),
                    velocity14: Some(Velocity14 {
                        avg_units: 2.5,
                        days_observed: 12,
                    }),
                    return_rate: Some(0.04),
                    days_cover: Some(Some(18.2)),
                },
                SkuSignal {
                    sku: "SKU2".to_string(),
                    velocity14: Some(Velocity14 {
                        avg_units: 0.0,
                        days_observed: 0,
                    }),
                    return_rate: None,
                    days_cover: Some(None),
                },
            ],
            campaigns: vec![CampaignSignal {
                campaign: "Spring Promo".to_string(),
                spend: 120.0,
                attributed_revenue: 300.5,
                roas: 2.5,
            }],
            notes: Some(vec!["SKUs included: 2".to_string()]),
        }
    }

    #[test]
    fn test_prompt_contract_markers() {
        let value = serde_json::to_value(valid_context()).unwrap();
        let prompt = build_prompt("What's trending?", &value);
        assert_eq!(prompt.matches(DATA_CONTEXT_BEGIN).count(), 1);
        assert_eq!(prompt.matches(DATA_CONTEXT_END).count(), 1);
        assert!(prompt.contains("QUESTION: What's trending?"));

        let begin = prompt.find(DATA_CONTEXT_BEGIN).unwrap();
        let end = prompt.find(DATA_CONTEXT_END).unwrap();
        let question = prompt.find(QUESTION_PREFIX).unwrap();
        let guidance = prompt.find("RESPONSE FORMAT:").unwrap();
        assert!(begin < end && end < question && question < guidance);
    }

    #[test]
    fn test_prompt_is_byte_stable() {
        let value = serde_json::to_value(valid_context()).unwrap();
        assert_eq!(build_prompt("q", &value), build_prompt("q", &value));
        assert_eq!(
            build_prompt("q", &value),
            build_prompt_for_context("q", &valid_context())
        );
    }

    #[test]
    fn test_neutral_context_rendering() {
        let rendered = format_neutral_context(&valid_context());
        assert!(rendered.contains(
            "SKU SKU1 velocity14_avg_units=2.5 days_observed=12 return_rate=0.04 days_cover=18.2"
        ));
        assert!(rendered
            .contains("SKU SKU2 velocity14_avg_units=0 days_observed=0 days_cover=unbounded"));
        assert!(rendered.contains("CAMP \"Spring Promo\" spend=120 attrib_rev=300.5 roas=2.5"));
        assert!(rendered.ends_with("NOTES:\n- SKUs included: 2"));
    }

    #[test]
    fn test_malformed_v1_renders_sentinel() {
        let rendered = format_context(&json!({"version": 1, "skuSignals": []}));
        assert_eq!(rendered, MALFORMED_CONTEXT_V1);
        let prompt = build_prompt("hi", &json!({"version": 1}));
        assert!(prompt.contains(&format!("{DATA_CONTEXT_BEGIN}\n{MALFORMED_CONTEXT_V1}\n")));
    }

    #[test]
    fn test_v1_renders_leniently_once_arrays_are_present() {
        let rendered = format_context(&json!({
            "version": 1,
            "skuSignals": [{"sku": "A"}, {"velocity14": 3}],
            "campaigns": []
        }));
        assert!(rendered.starts_with("CONTEXT_VERSION: 1\nWINDOW:"));
        assert!(rendered.contains("SKU_SIGNALS (1):\nSKU A\n"));
        assert!(rendered.ends_with("CAMPAIGNS (0):"));
        assert!(!rendered.contains(MALFORMED_CONTEXT_V1));

        let rendered = format_context(&json!({
            "version": 1,
            "generatedAt": "not a timestamp",
            "skuSignals": [],
            "campaigns": [{"campaign": "C", "spend": 1, "attributedRevenue": 2, "roas": 2}],
            "notes": ["n"]
        }));
        assert!(rendered.contains("GENERATED_AT: not a timestamp\n"));
        assert!(rendered.contains("CAMP \"C\" spend=1 attrib_rev=2 roas=2\nNOTES:\n- n"));
    }

    #[test]
    fn test_unknown_version_is_not_assumed_v1() {
        let rendered = format_context(&json!({"version": 2, "skuSignals": [], "campaigns": []}));
        assert!(rendered.starts_with("UNSUPPORTED_CONTEXT_VERSION: 2\n"));
    }

    #[test]
    fn test_generic_shapes() {
        assert_eq!(format_context(&Value::Null), NO_METRICS);
        assert_eq!(format_context(&json!("")), NO_METRICS);
        assert_eq!(format_context(&json!(0)), NO_METRICS);
        assert_eq!(format_context(&json!("plain text")), "plain text");
        assert_eq!(format_context(&json!(42)), "42");
        assert_eq!(
            format_context(&json!([{"a": 1}, "b"])),
            "ITEM_1: {\"a\":1}\nITEM_2: b"
        );
        assert_eq!(format_context(&json!({"totalFiles": 2})), "{\"totalFiles\":2}");
    }

    #[test]
    fn test_legacy_summary_rendering() {
        let value = json!({
            "timeWindowDays": 14,
            "sales": {
                "generatedAt": "2024-03-01T08:00:00Z",
                "skus": [
                    {"sku": "A", "recentUnits": 6.0, "priorUnits": 4.0, "pctChangeUnits": 50.0,
                     "recentRevenue": 60.0, "priorRevenue": 40.0, "pctChangeRevenue": 50.0},
                    {"sku": "B", "recentUnits": 1.0, "priorUnits": 3.0, "pctChangeUnits": -66.666,
                     "recentRevenue": 10.0, "priorRevenue": 30.0, "pctChangeRevenue": -66.666}
                ]
            },
            "campaigns": [
                {"campaign": "X", "recentSpend": 10.0, "recentAttributedRevenue": 5.0, "roas": 0.5, "units": 1.0}
            ]
        });
        let rendered = format_context(&value);
        assert!(rendered.starts_with("TIME_WINDOW_DAYS: 14\nSALES_TOP_REVENUE_GROWTH:\nSKU A"));
        assert!(rendered.contains("SALES_TOP_REVENUE_DECLINE:\nSKU B revΔ%=-66.67"));
        assert!(rendered.contains("CAMPAIGNS_LOW_ROAS:\nCAMP \"X\" spend=10 attrib_rev=5 roas=0.5 units=1"));
    }

    #[test]
    fn test_partial_legacy_summary_uses_defaults() {
        let rendered = format_context(&json!({
            "sales": {"skus": [{"sku": "A", "pctChangeRevenue": 5}]}
        }));
        assert_eq!(
            rendered,
            "TIME_WINDOW_DAYS: 14\n\
             SALES_TOP_REVENUE_GROWTH:\n\
             SKU A revΔ%=5 unitsΔ%=0 last=0/0 prev=0/0\n\
             SALES_TOP_REVENUE_DECLINE:\n\
             SKU A revΔ%=5 unitsΔ%=0 last=0/0 prev=0/0"
        );

        assert_eq!(
            format_context(&json!({"sales": null, "timeWindowDays": 0})),
            "TIME_WINDOW_DAYS: 14"
        );
    }

    #[test]
    fn test_legacy_summary_accepts_week_field_names() {
        let rendered = format_context(&json!({
            "timeWindowDays": 7,
            "sales": {"skus": [
                {"sku": "A", "last7Units": 3, "prev7Units": 1, "pctChangeUnits": 200,
                 "last7Revenue": 30, "prev7Revenue": 10, "pctChangeRevenue": 200}
            ]},
            "campaigns": [
                {"campaign": "W", "last7Spend": 8, "last7AttributedRevenue": 4, "roas": 0.5, "units": 2}
            ]
        }));
        assert!(rendered.starts_with("TIME_WINDOW_DAYS: 7\n"));
        assert!(rendered.contains("SKU A revΔ%=200 unitsΔ%=200 last=30/3 prev=10/1"));
        assert!(rendered.contains("CAMPAIGNS_LOW_ROAS:\nCAMP \"W\" spend=8 attrib_rev=4 roas=0.5 units=2"));
    }

    #[test]
    fn test_preview_truncates() {
        let preview = build_prompt_preview("q", &Value::Null);
        assert_eq!(preview.chars().count(), PREVIEW_CHARS + 3);
        assert!(preview.ends_with("..."));
    }
}
