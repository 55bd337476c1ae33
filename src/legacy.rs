//! Fallback summaries used when no neutral context can be built.
//!
//! [`build_metrics_summary`] compares the 14 days before today with the 14
//! days before that, anchored on the wall clock rather than the data.
//! [`summarize_files`] only describes the uploads themselves.

use crate::extraction::{extract_sales, find_file, RowKind};
use crate::schema::ParsedFile;
use crate::utils::{cell_text, coerce_number, parse_day, round2};
use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const SUMMARY_WINDOW_DAYS: u64 = 14;
const MAX_SUMMARY_SKUS: usize = 100;
const MAX_SUMMARY_CAMPAIGNS: usize = 50;
const TOP_COLUMNS: usize = 5;

/// One SKU across the two windows. Missing fields read as zero, and the
/// older `last7*`/`prev7*` names are accepted when reading.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SkuComparison {
    pub sku: String,
    #[serde(alias = "last7Units")]
    pub recent_units: f64,
    #[serde(alias = "prev7Units")]
    pub prior_units: f64,
    pub pct_change_units: f64,
    #[serde(alias = "last7Revenue")]
    pub recent_revenue: f64,
    #[serde(alias = "prev7Revenue")]
    pub prior_revenue: f64,
    pub pct_change_revenue: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SalesSummary {
    pub skus: Vec<SkuComparison>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CampaignWindow {
    pub campaign: String,
    #[serde(alias = "last7Spend")]
    pub recent_spend: f64,
    #[serde(alias = "last7AttributedRevenue")]
    pub recent_attributed_revenue: f64,
    pub roas: f64,
    pub units: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSummary {
    pub time_window_days: u64,
    pub sales: SalesSummary,
    pub campaigns: Vec<CampaignWindow>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnFrequency {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileSummary {
    pub total_files: usize,
    pub total_rows: usize,
    pub top_columns: Vec<ColumnFrequency>,
    pub columns_union_count: usize,
}

/// Percentage change from `prev` to `curr`; growth from zero reads as 100.
pub fn pct_change(prev: f64, curr: f64) -> f64 {
    if prev == 0.0 {
        if curr == 0.0 {
            0.0
        } else {
            100.0
        }
    } else {
        (curr - prev) / prev * 100.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Bucket {
    Recent,
    Prior,
}

struct ComparisonWindows {
    prior_start: NaiveDate,
    recent_start: NaiveDate,
    end: NaiveDate,
}

impl ComparisonWindows {
    fn ending_before(today: NaiveDate) -> Self {
        let recent_start = today
            .checked_sub_days(Days::new(SUMMARY_WINDOW_DAYS))
            .unwrap_or(today);
        let prior_start = recent_start
            .checked_sub_days(Days::new(SUMMARY_WINDOW_DAYS))
            .unwrap_or(recent_start);
        Self {
            prior_start,
            recent_start,
            end: today,
        }
    }

    fn bucket(&self, date: NaiveDate) -> Option<Bucket> {
        if date >= self.recent_start && date < self.end {
            Some(Bucket::Recent)
        } else if date >= self.prior_start && date < self.recent_start {
            Some(Bucket::Prior)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct UnitsRevenue {
    units: f64,
    revenue: f64,
}

/// Comparative 14-day windows ending before `today`. Returns `None` when
/// neither a sales nor an ad-spend file was uploaded.
pub fn build_metrics_summary(
    files: &[ParsedFile],
    today: NaiveDate,
    generated_at: DateTime<Utc>,
) -> Option<MetricsSummary> {
    let ad_file = find_file(files, RowKind::AdSpend);
    if find_file(files, RowKind::Sales).is_none() && ad_file.is_none() {
        return None;
    }
    let windows = ComparisonWindows::ending_before(today);

    let mut order: Vec<String> = Vec::new();
    let mut recent: HashMap<String, UnitsRevenue> = HashMap::new();
    let mut prior: HashMap<String, UnitsRevenue> = HashMap::new();
    for row in extract_sales(files) {
        let Some(bucket) = windows.bucket(row.date) else {
            continue;
        };
        let store = match bucket {
            Bucket::Recent => &mut recent,
            Bucket::Prior => &mut prior,
        };
        let entry = store.entry(row.sku.clone()).or_default();
        entry.units += row.units.unwrap_or(0.0);
        entry.revenue += row.revenue.unwrap_or(0.0);
        if !order.contains(&row.sku) {
            order.push(row.sku);
        }
    }

    let mut skus: Vec<SkuComparison> = order
        .into_iter()
        .take(MAX_SUMMARY_SKUS)
        .map(|sku| {
            let r = recent.get(&sku).copied().unwrap_or_default();
            let p = prior.get(&sku).copied().unwrap_or_default();
            SkuComparison {
                pct_change_units: pct_change(p.units, r.units),
                pct_change_revenue: pct_change(p.revenue, r.revenue),
                recent_units: r.units,
                prior_units: p.units,
                recent_revenue: r.revenue,
                prior_revenue: p.revenue,
                sku,
            }
        })
        .collect();
    skus.sort_by(|a, b| b.pct_change_revenue.total_cmp(&a.pct_change_revenue));

    let mut campaign_order: Vec<String> = Vec::new();
    let mut campaign_totals: HashMap<String, (f64, f64, f64)> = HashMap::new();
    for record in ad_file.map(|f| f.retained_rows.as_slice()).unwrap_or_default() {
        let campaign = cell_text(record.get("campaign"));
        let Some(date) = parse_day(&cell_text(record.get("date"))) else {
            continue;
        };
        if campaign.is_empty() || windows.bucket(date) != Some(Bucket::Recent) {
            continue;
        }
        if !campaign_totals.contains_key(&campaign) {
            campaign_order.push(campaign.clone());
        }
        let totals = campaign_totals.entry(campaign).or_default();
        totals.0 += coerce_number(record.get("spend")).unwrap_or(0.0);
        totals.1 += coerce_number(record.get("attributed_revenue")).unwrap_or(0.0);
        totals.2 += coerce_number(record.get("attributed_units")).unwrap_or(0.0);
    }

    let campaigns = campaign_order
        .into_iter()
        .take(MAX_SUMMARY_CAMPAIGNS)
        .map(|campaign| {
            let (spend, revenue, units) = campaign_totals
                .get(&campaign)
                .copied()
                .unwrap_or_default();
            CampaignWindow {
                campaign,
                recent_spend: round2(spend),
                recent_attributed_revenue: round2(revenue),
                roas: if spend > 0.0 { round2(revenue / spend) } else { 0.0 },
                units,
            }
        })
        .collect();

    Some(MetricsSummary {
        time_window_days: SUMMARY_WINDOW_DAYS,
        sales: SalesSummary { skus, generated_at },
        campaigns,
    })
}

pub fn summarize_files(files: &[ParsedFile]) -> FileSummary {
    let mut frequency: Vec<ColumnFrequency> = Vec::new();
    for column in files.iter().flat_map(|f| f.columns.iter()) {
        match frequency.iter_mut().find(|c| &c.name == column) {
            Some(existing) => existing.count += 1,
            None => frequency.push(ColumnFrequency {
                name: column.clone(),
                count: 1,
            }),
        }
    }
    let columns_union_count = frequency.len();
    frequency.sort_by(|a, b| b.count.cmp(&a.count));
    frequency.truncate(TOP_COLUMNS);

    FileSummary {
        total_files: files.len(),
        total_rows: files.iter().map(|f| f.row_count).sum(),
        top_columns: frequency,
        columns_union_count,
    }
}
