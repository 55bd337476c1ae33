use chrono::{DateTime, NaiveDate, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// A single parsed CSV record. Cells are dynamically typed: numbers, booleans,
/// strings, or null for empty cells.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

pub const NEUTRAL_CONTEXT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Number,
    Date,
    String,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
pub struct NumericStats {
    pub min: f64,
    pub max: f64,
}

/// An uploaded file after CSV parsing. Only `name` and `retained_rows` feed the
/// signal pipeline; the rest describes the upload for display and fallbacks.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ParsedFile {
    pub name: String,
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub row_count: usize,
    #[serde(default)]
    pub truncated: bool,
    #[serde(default)]
    pub columns: Vec<String>,
    #[serde(default)]
    pub column_types: BTreeMap<String, ColumnType>,
    #[serde(default)]
    pub numeric_stats: BTreeMap<String, NumericStats>,
    #[serde(default)]
    pub sample_rows: Vec<RawRecord>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distinct_sku: Option<usize>,
    #[serde(default)]
    pub retained_rows: Vec<RawRecord>,
}

impl ParsedFile {
    /// Descriptor carrying only a name and retained records.
    pub fn from_records(name: impl Into<String>, retained_rows: Vec<RawRecord>) -> Self {
        Self {
            name: name.into(),
            row_count: retained_rows.len(),
            retained_rows,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SalesRow {
    pub date: NaiveDate,
    pub sku: String,
    pub units: Option<f64>,
    pub revenue: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReturnsRow {
    pub date: NaiveDate,
    pub sku: String,
    pub units_returned: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRow {
    pub snapshot_date: Option<NaiveDate>,
    pub date: Option<NaiveDate>,
    pub sku: String,
    pub on_hand: Option<f64>,
}

impl InventoryRow {
    /// The snapshot date, falling back to the plain `date` column.
    pub fn effective_date(&self) -> Option<NaiveDate> {
        self.snapshot_date.or(self.date)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AdRow {
    pub date: NaiveDate,
    pub campaign: String,
    pub spend: Option<f64>,
    pub attributed_revenue: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Velocity14 {
    #[schemars(description = "Average units sold per observed day inside the trailing 14-day window")]
    pub avg_units: f64,
    #[schemars(description = "Distinct days with a sales row for this SKU inside the window")]
    pub days_observed: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Returns14 {
    pub units_returned: f64,
    pub units_sold: f64,
    pub return_rate: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RoasResult {
    pub spend: f64,
    pub attributed_revenue: f64,
    pub roas: f64,
}

/// `days_cover` is `f64::INFINITY` when velocity is zero; it only becomes
/// `null` once surfaced through [`NeutralContext`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DaysCover {
    pub on_hand: f64,
    pub velocity: f64,
    pub days_cover: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SkuSignal {
    pub sku: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity14: Option<Velocity14>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(description = "Returned units over sold units in the window. Omitted when no returns file was uploaded.")]
    pub return_rate: Option<f64>,

    /// Outer `None`: no inventory data, field omitted. `Some(None)`: unbounded cover, serialized as `null`.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_present"
    )]
    #[schemars(with = "Option<f64>")]
    #[schemars(description = "On-hand units divided by daily velocity. null when velocity is zero; omitted when no inventory file was uploaded.")]
    pub days_cover: Option<Option<f64>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSignal {
    pub campaign: String,
    pub spend: f64,
    pub attributed_revenue: f64,
    pub roas: f64,
}

/// The bounded, versioned context handed to the language model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NeutralContext {
    #[schemars(description = "Contract version. Always 1 for this shape.")]
    pub version: u32,

    pub generated_at: DateTime<Utc>,

    #[schemars(description = "SKUs ordered by descending total sales volume")]
    pub sku_signals: Vec<SkuSignal>,

    #[schemars(description = "Campaigns ordered by descending spend")]
    pub campaigns: Vec<CampaignSignal>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<Vec<String>>,
}

impl NeutralContext {
    pub fn generate_json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(NeutralContext)
    }

    pub fn json_schema() -> Result<String, serde_json::Error> {
        let schema = Self::generate_json_schema();
        serde_json::to_string_pretty(&schema)
    }
}

// A present key always lands in `Some`, so an explicit `null` survives as `Some(None)`.
fn deserialize_present<'de, D>(deserializer: D) -> Result<Option<Option<f64>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<f64>::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_context() -> NeutralContext {
        NeutralContext {
            version: NEUTRAL_CONTEXT_VERSION,
            generated_at: Utc.with_ymd_and_hms(2024, 1, 31, 12, 0, 0).unwrap(),
            sku_signals: vec![
                SkuSignal {
                    sku: "SKU1".to_string(),
                    velocity14: Some(Velocity14 {
                        avg_units: 4.5,
                        days_observed: 10,
                    }),
                    return_rate: Some(0.05),
                    days_cover: Some(None),
                },
                SkuSignal {
                    sku: "SKU2".to_string(),
                    velocity14: Some(Velocity14 {
                        avg_units: 0.0,
                        days_observed: 0,
                    }),
                    return_rate: None,
                    days_cover: None,
                },
            ],
            campaigns: vec![CampaignSignal {
                campaign: "Spring".to_string(),
                spend: 100.0,
                attributed_revenue: 250.0,
                roas: 2.5,
            }],
            notes: None,
        }
    }

    #[test]
    fn test_schema_generation() {
        let schema_json = NeutralContext::json_schema().unwrap();
        assert!(schema_json.contains("skuSignals"));
        assert!(schema_json.contains("campaigns"));
        assert!(schema_json.contains("generatedAt"));
    }

    #[test]
    fn test_serialization_uses_wire_names() {
        let json = serde_json::to_value(sample_context()).unwrap();
        let first = &json["skuSignals"][0];
        assert_eq!(first["velocity14"]["avgUnits"], 4.5);
        assert_eq!(first["velocity14"]["daysObserved"], 10);
        assert_eq!(first["returnRate"], 0.05);
        assert!(first["daysCover"].is_null());
        assert!(first.as_object().unwrap().contains_key("daysCover"));

        let second = json["skuSignals"][1].as_object().unwrap();
        assert!(!second.contains_key("returnRate"));
        assert!(!second.contains_key("daysCover"));

        assert_eq!(json["campaigns"][0]["attributedRevenue"], 250.0);
        assert!(json.get("notes").is_none());
    }

    #[test]
    fn test_null_days_cover_survives_deserialization() {
        let json = serde_json::to_string(&sample_context()).unwrap();
        let back: NeutralContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back.sku_signals[0].days_cover, Some(None));
        assert_eq!(back.sku_signals[1].days_cover, None);
        assert_eq!(back, sample_context());
    }

    #[test]
    fn test_inventory_effective_date() {
        let row = InventoryRow {
            snapshot_date: None,
            date: NaiveDate::from_ymd_opt(2024, 1, 2),
            sku: "A".to_string(),
            on_hand: Some(3.0),
        };
        assert_eq!(row.effective_date(), NaiveDate::from_ymd_opt(2024, 1, 2));
    }
}
