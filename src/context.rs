//! Assembles the versioned [`NeutralContext`] from uploaded files.
//!
//! Two windowing policies coexist here and are intentionally not unified:
//! the per-SKU signals use the trailing 14-day window of the metric
//! primitives, while SKU ranking and campaign totals use all-time sums over
//! every extracted row.

use crate::extraction::ExtractedRows;
use crate::metrics::{compute_days_cover, compute_returns14, compute_velocity14, MetricCache, RowSet};
use crate::schema::{
    AdRow, CampaignSignal, NeutralContext, ParsedFile, SalesRow, SkuSignal, Velocity14,
    NEUTRAL_CONTEXT_VERSION,
};
use crate::utils::{round2, saturate};
use chrono::{DateTime, Utc};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub const DEFAULT_MAX_SKUS: usize = 30;
pub const DEFAULT_MAX_CAMPAIGNS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextOptions {
    pub max_skus: usize,
    pub max_campaigns: usize,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_skus: DEFAULT_MAX_SKUS,
            max_campaigns: DEFAULT_MAX_CAMPAIGNS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct CampaignTotals {
    spend: f64,
    revenue: f64,
}

/// All-time units per SKU, highest first. Absent units count as zero and ties
/// keep first-seen order.
pub fn rank_skus_all_time(sales: &[SalesRow]) -> Vec<(String, f64)> {
    let mut totals: Vec<(String, f64)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for row in sales {
        let slot = *index.entry(row.sku.as_str()).or_insert_with(|| {
            totals.push((row.sku.clone(), 0.0));
            totals.len() - 1
        });
        totals[slot].1 = saturate(totals[slot].1 + row.units.unwrap_or(0.0));
    }
    totals.sort_by(|a, b| b.1.total_cmp(&a.1));
    totals
}

/// All-time spend and attributed revenue per campaign, highest spend first.
fn aggregate_campaigns_all_time(ads: &[AdRow]) -> Vec<(String, CampaignTotals)> {
    let mut totals: Vec<(String, CampaignTotals)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();
    for row in ads {
        let slot = *index.entry(row.campaign.as_str()).or_insert_with(|| {
            totals.push((
                row.campaign.clone(),
                CampaignTotals {
                    spend: 0.0,
                    revenue: 0.0,
                },
            ));
            totals.len() - 1
        });
        let entry = &mut totals[slot].1;
        entry.spend = saturate(entry.spend + row.spend.unwrap_or(0.0));
        entry.revenue = saturate(entry.revenue + row.attributed_revenue.unwrap_or(0.0));
    }
    totals.sort_by(|a, b| b.1.spend.total_cmp(&a.1.spend));
    totals
}

pub struct ContextBuilder<'c> {
    options: ContextOptions,
    cache: &'c MetricCache,
}

impl<'c> ContextBuilder<'c> {
    pub fn new(cache: &'c MetricCache) -> Self {
        Self {
            options: ContextOptions::default(),
            cache,
        }
    }

    pub fn with_options(mut self, options: ContextOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(&self, files: &[ParsedFile]) -> Option<NeutralContext> {
        self.build_at(files, Utc::now())
    }

    /// Builds the context with a pinned `generated_at`. Returns `None` when
    /// neither sales nor ad rows can be extracted.
    pub fn build_at(
        &self,
        files: &[ParsedFile],
        generated_at: DateTime<Utc>,
    ) -> Option<NeutralContext> {
        let rows = ExtractedRows::from_files(files);
        if rows.sales.is_empty() && rows.ads.is_empty() {
            debug!("No sales or ad rows extracted; neutral context unavailable");
            return None;
        }

        let has_returns = !rows.returns.is_empty();
        let has_inventory = !rows.inventory.is_empty();
        let top_skus: Vec<String> = rank_skus_all_time(&rows.sales)
            .into_iter()
            .take(self.options.max_skus)
            .map(|(sku, _)| sku)
            .collect();

        let sales = RowSet::new(rows.sales);
        let returns = RowSet::new(rows.returns);
        let inventory = RowSet::new(rows.inventory);

        let sku_signals: Vec<SkuSignal> = top_skus
            .into_iter()
            .map(|sku| {
                let velocity = compute_velocity14(self.cache, &sales, &sku);
                let return_rate = has_returns.then(|| {
                    round2(compute_returns14(self.cache, &returns, &sales, &sku).return_rate)
                });
                let days_cover = has_inventory.then(|| {
                    let cover = compute_days_cover(self.cache, &inventory, &sales, &sku);
                    (cover.velocity > 0.0).then(|| round2(cover.days_cover))
                });
                SkuSignal {
                    sku,
                    velocity14: Some(Velocity14 {
                        avg_units: round2(velocity.avg_units),
                        days_observed: velocity.days_observed,
                    }),
                    return_rate,
                    days_cover,
                }
            })
            .collect();

        let campaigns: Vec<CampaignSignal> = aggregate_campaigns_all_time(&rows.ads)
            .into_iter()
            .take(self.options.max_campaigns)
            .map(|(campaign, totals)| {
                let roas = if totals.spend > 0.0 {
                    totals.revenue / totals.spend
                } else {
                    0.0
                };
                CampaignSignal {
                    campaign,
                    spend: round2(totals.spend),
                    attributed_revenue: round2(totals.revenue),
                    roas: round2(roas),
                }
            })
            .collect();

        info!(
            "Built neutral context with {} SKUs and {} campaigns",
            sku_signals.len(),
            campaigns.len()
        );

        let notes = vec![
            "Neutral context: no rankings, no labels.".to_string(),
            format!("SKUs included: {}", sku_signals.len()),
            format!("Campaigns included: {}", campaigns.len()),
        ];

        Some(NeutralContext {
            version: NEUTRAL_CONTEXT_VERSION,
            generated_at,
            sku_signals,
            campaigns,
            notes: Some(notes),
        })
    }
}

/// Builds a context with a cache scoped to this single call.
pub fn build_context(files: &[ParsedFile], options: &ContextOptions) -> Option<NeutralContext> {
    let cache = MetricCache::new();
    ContextBuilder::new(&cache).with_options(*options).build(files)
}

/// [`build_context`] with a pinned clock.
pub fn build_context_at(
    files: &[ParsedFile],
    options: &ContextOptions,
    generated_at: DateTime<Utc>,
) -> Option<NeutralContext> {
    let cache = MetricCache::new();
    ContextBuilder::new(&cache)
        .with_options(*options)
        .build_at(files, generated_at)
}
