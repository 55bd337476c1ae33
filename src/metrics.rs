//! Per-entity signal primitives over the trailing 14-day window.
//!
//! Every primitive is a pure function of its row sets and entity key. Results
//! are memoized in a caller-owned [`MetricCache`] keyed by SHA-256 digests of
//! the row contents, so a cache hit and a cache miss always return the same
//! value.

use crate::schema::{
    AdRow, DaysCover, InventoryRow, ReturnsRow, RoasResult, Returns14, SalesRow, Velocity14,
};
use crate::utils::{today_utc, TrailingWindow, EPSILON};
use chrono::NaiveDate;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

pub const DEFAULT_CACHE_CAPACITY: usize = 4096;

/// Rows that can contribute to a content digest.
pub trait DigestRow {
    fn feed(&self, hasher: &mut Sha256);
}

fn feed_str(hasher: &mut Sha256, s: &str) {
    hasher.update((s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

fn feed_num(hasher: &mut Sha256, n: Option<f64>) {
    match n {
        Some(v) => {
            hasher.update([1u8]);
            hasher.update(v.to_le_bytes());
        }
        None => hasher.update([0u8]),
    }
}

fn feed_date(hasher: &mut Sha256, d: Option<NaiveDate>) {
    match d {
        Some(date) => {
            hasher.update([1u8]);
            feed_str(hasher, &date.to_string());
        }
        None => hasher.update([0u8]),
    }
}

impl DigestRow for SalesRow {
    fn feed(&self, hasher: &mut Sha256) {
        feed_date(hasher, Some(self.date));
        feed_str(hasher, &self.sku);
        feed_num(hasher, self.units);
        feed_num(hasher, self.revenue);
    }
}

impl DigestRow for ReturnsRow {
    fn feed(&self, hasher: &mut Sha256) {
        feed_date(hasher, Some(self.date));
        feed_str(hasher, &self.sku);
        feed_num(hasher, self.units_returned);
    }
}

impl DigestRow for InventoryRow {
    fn feed(&self, hasher: &mut Sha256) {
        feed_date(hasher, self.snapshot_date);
        feed_date(hasher, self.date);
        feed_str(hasher, &self.sku);
        feed_num(hasher, self.on_hand);
    }
}

impl DigestRow for AdRow {
    fn feed(&self, hasher: &mut Sha256) {
        feed_date(hasher, Some(self.date));
        feed_str(hasher, &self.campaign);
        feed_num(hasher, self.spend);
        feed_num(hasher, self.attributed_revenue);
    }
}

pub type RowDigest = [u8; 32];

/// A row list paired with the digest of its contents, computed once.
#[derive(Debug, Clone)]
pub struct RowSet<T> {
    rows: Vec<T>,
    digest: RowDigest,
}

impl<T: DigestRow> RowSet<T> {
    pub fn new(rows: Vec<T>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((rows.len() as u64).to_le_bytes());
        for row in &rows {
            row.feed(&mut hasher);
        }
        Self {
            rows,
            digest: hasher.finalize().into(),
        }
    }
}

impl<T> RowSet<T> {
    pub fn digest(&self) -> &RowDigest {
        &self.digest
    }

    pub fn into_rows(self) -> Vec<T> {
        self.rows
    }
}

impl<T> Deref for RowSet<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.rows
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum MetricKind {
    Velocity,
    Returns,
    Roas,
    DaysCover,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    kind: MetricKind,
    inputs: [RowDigest; 2],
    entity: String,
}

impl CacheKey {
    fn new(kind: MetricKind, inputs: [&RowDigest; 2], entity: &str) -> Self {
        Self {
            kind,
            inputs: [*inputs[0], *inputs[1]],
            entity: entity.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum CachedMetric {
    Velocity(Velocity14),
    Returns(Returns14),
    Roas(RoasResult),
    DaysCover(DaysCover),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
}

/// Bounded LRU memo for metric results. Shareable across threads; entries
/// are written once per key, so a race only repeats work.
pub struct MetricCache {
    entries: Mutex<LruCache<CacheKey, CachedMetric>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Default for MetricCache {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }
}

impl MetricCache {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.lock().len(),
        }
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<CacheKey, CachedMetric>> {
        // Entries are plain values; a panic elsewhere cannot leave one half-written.
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get(&self, key: &CacheKey) -> Option<CachedMetric> {
        let found = self.lock().get(key).copied();
        let counter = if found.is_some() {
            &self.hits
        } else {
            &self.misses
        };
        counter.fetch_add(1, Ordering::Relaxed);
        found
    }

    fn put(&self, key: CacheKey, value: CachedMetric) {
        self.lock().put(key, value);
    }
}

impl std::fmt::Debug for MetricCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricCache")
            .field("stats", &self.stats())
            .finish()
    }
}

const NO_INPUT: RowDigest = [0u8; 32];

pub fn compute_velocity14(
    cache: &MetricCache,
    sales: &RowSet<SalesRow>,
    sku: &str,
) -> Velocity14 {
    let key = CacheKey::new(MetricKind::Velocity, [sales.digest(), &NO_INPUT], sku);
    if let Some(CachedMetric::Velocity(hit)) = cache.get(&key) {
        return hit;
    }

    let window = TrailingWindow::ending_at_latest(sales.iter().map(|r| r.date), today_utc());
    let mut total_units = 0.0;
    let mut days = BTreeSet::new();
    for row in sales.iter().filter(|r| r.sku == sku) {
        let Some(units) = row.units else { continue };
        if !window.contains(row.date) {
            continue;
        }
        total_units += units;
        days.insert(row.date);
    }

    let days_observed = days.len() as u32;
    let avg_units = if days_observed > 0 {
        total_units / f64::from(days_observed)
    } else {
        0.0
    };
    let value = Velocity14 {
        avg_units,
        days_observed,
    };
    cache.put(key, CachedMetric::Velocity(value));
    value
}

pub fn compute_returns14(
    cache: &MetricCache,
    returns: &RowSet<ReturnsRow>,
    sales: &RowSet<SalesRow>,
    sku: &str,
) -> Returns14 {
    let key = CacheKey::new(MetricKind::Returns, [returns.digest(), sales.digest()], sku);
    if let Some(CachedMetric::Returns(hit)) = cache.get(&key) {
        return hit;
    }

    let window = TrailingWindow::ending_at_latest(
        returns
            .iter()
            .map(|r| r.date)
            .chain(sales.iter().map(|r| r.date)),
        today_utc(),
    );

    let units_returned: f64 = returns
        .iter()
        .filter(|r| r.sku == sku && window.contains(r.date))
        .filter_map(|r| r.units_returned)
        .sum();
    let units_sold: f64 = sales
        .iter()
        .filter(|r| r.sku == sku && window.contains(r.date))
        .filter_map(|r| r.units)
        .sum();

    let return_rate = if units_sold == 0.0 {
        0.0
    } else {
        units_returned / (units_sold + EPSILON)
    };
    let value = Returns14 {
        units_returned,
        units_sold,
        return_rate,
    };
    cache.put(key, CachedMetric::Returns(value));
    value
}

pub fn compute_roas(cache: &MetricCache, ads: &RowSet<AdRow>, campaign: &str) -> RoasResult {
    let key = CacheKey::new(MetricKind::Roas, [ads.digest(), &NO_INPUT], campaign);
    if let Some(CachedMetric::Roas(hit)) = cache.get(&key) {
        return hit;
    }

    let window = TrailingWindow::ending_at_latest(ads.iter().map(|r| r.date), today_utc());
    let mut spend = 0.0;
    let mut attributed_revenue = 0.0;
    for row in ads
        .iter()
        .filter(|r| r.campaign == campaign && window.contains(r.date))
    {
        spend += row.spend.unwrap_or(0.0);
        attributed_revenue += row.attributed_revenue.unwrap_or(0.0);
    }

    let roas = if spend == 0.0 {
        0.0
    } else {
        attributed_revenue / (spend + EPSILON)
    };
    let value = RoasResult {
        spend,
        attributed_revenue,
        roas,
    };
    cache.put(key, CachedMetric::Roas(value));
    value
}

pub fn compute_days_cover(
    cache: &MetricCache,
    inventory: &RowSet<InventoryRow>,
    sales: &RowSet<SalesRow>,
    sku: &str,
) -> DaysCover {
    let key = CacheKey::new(
        MetricKind::DaysCover,
        [inventory.digest(), sales.digest()],
        sku,
    );
    if let Some(CachedMetric::DaysCover(hit)) = cache.get(&key) {
        return hit;
    }

    // Latest dated snapshot wins; on equal dates the later row in input order wins.
    let mut latest: Option<(NaiveDate, f64)> = None;
    for row in inventory.iter().filter(|r| r.sku == sku) {
        let Some(date) = row.effective_date() else {
            continue;
        };
        if latest.map_or(true, |(seen, _)| date >= seen) {
            latest = Some((date, row.on_hand.unwrap_or(0.0)));
        }
    }
    let on_hand = latest.map_or(0.0, |(_, on_hand)| on_hand);

    let velocity = compute_velocity14(cache, sales, sku).avg_units;
    let days_cover = if velocity > 0.0 {
        on_hand / (velocity + EPSILON)
    } else {
        f64::INFINITY
    };
    let value = DaysCover {
        on_hand,
        velocity,
        days_cover,
    };
    cache.put(key, CachedMetric::DaysCover(value));
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Days;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sale(date: NaiveDate, sku: &str, units: Option<f64>) -> SalesRow {
        SalesRow {
            date,
            sku: sku.to_string(),
            units,
            revenue: None,
        }
    }

    fn forty_days_of_sales() -> RowSet<SalesRow> {
        let end = day(2024, 1, 30);
        let rows = (0..40)
            .map(|offset| sale(end - Days::new(offset), "SKU1", Some(1.0 + offset as f64)))
            .collect();
        RowSet::new(rows)
    }

    #[test]
    fn test_velocity_only_counts_trailing_window() {
        let cache = MetricCache::new();
        let sales = forty_days_of_sales();
        let v = compute_velocity14(&cache, &sales, "SKU1");

        // 2024-01-30 back to 2024-01-17 are offsets 0..=13, units 1..=14.
        assert_eq!(v.days_observed, 14);
        assert!((v.avg_units - 105.0 / 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_velocity_skips_absent_units_and_counts_distinct_days() {
        let cache = MetricCache::new();
        let d = day(2024, 1, 10);
        let sales = RowSet::new(vec![
            sale(d, "A", Some(4.0)),
            sale(d, "A", Some(2.0)),
            sale(day(2024, 1, 9), "A", None),
            sale(day(2024, 1, 8), "B", Some(100.0)),
        ]);
        let v = compute_velocity14(&cache, &sales, "A");
        assert_eq!(v.days_observed, 1);
        assert_eq!(v.avg_units, 6.0);

        let missing = compute_velocity14(&cache, &sales, "ZZZ");
        assert_eq!(missing, Velocity14 { avg_units: 0.0, days_observed: 0 });
    }

    #[test]
    fn test_returns_rate_is_zero_when_nothing_sold() {
        let cache = MetricCache::new();
        let returns = RowSet::new(vec![ReturnsRow {
            date: day(2024, 1, 10),
            sku: "A".to_string(),
            units_returned: Some(3.0),
        }]);
        let sales = RowSet::new(vec![sale(day(2024, 1, 10), "A", Some(0.0))]);
        let r = compute_returns14(&cache, &returns, &sales, "A");
        assert_eq!(r.units_sold, 0.0);
        assert_eq!(r.units_returned, 3.0);
        assert_eq!(r.return_rate, 0.0);
        assert!(!r.return_rate.is_nan());
    }

    #[test]
    fn test_returns_window_spans_both_lists() {
        let cache = MetricCache::new();
        let returns = RowSet::new(vec![
            ReturnsRow {
                date: day(2024, 2, 1),
                sku: "A".to_string(),
                units_returned: Some(1.0),
            },
            ReturnsRow {
                date: day(2024, 1, 1),
                sku: "A".to_string(),
                units_returned: Some(50.0),
            },
        ]);
        let sales = RowSet::new(vec![
            sale(day(2024, 1, 25), "A", Some(10.0)),
            sale(day(2024, 1, 2), "A", Some(90.0)),
        ]);
        let r = compute_returns14(&cache, &returns, &sales, "A");
        assert_eq!(r.units_returned, 1.0);
        assert_eq!(r.units_sold, 10.0);
        assert!((r.return_rate - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_roas_windowed_and_zero_spend_override() {
        let cache = MetricCache::new();
        let ad = |date, campaign: &str, spend, revenue| AdRow {
            date,
            campaign: campaign.to_string(),
            spend,
            attributed_revenue: revenue,
        };
        let ads = RowSet::new(vec![
            ad(day(2024, 3, 10), "Spring", Some(20.0), Some(50.0)),
            ad(day(2024, 3, 9), "Spring", None, Some(10.0)),
            ad(day(2024, 1, 1), "Spring", Some(1000.0), Some(0.0)),
            ad(day(2024, 3, 10), "Brand", Some(0.0), Some(30.0)),
        ]);

        let spring = compute_roas(&cache, &ads, "Spring");
        assert_eq!(spring.spend, 20.0);
        assert_eq!(spring.attributed_revenue, 60.0);
        assert!((spring.roas - 3.0).abs() < 1e-6);

        let brand = compute_roas(&cache, &ads, "Brand");
        assert_eq!(brand.roas, 0.0);
        assert_eq!(brand.attributed_revenue, 30.0);
    }

    #[test]
    fn test_days_cover_latest_snapshot_and_ties() {
        let cache = MetricCache::new();
        let snap = |date: Option<NaiveDate>, on_hand| InventoryRow {
            snapshot_date: date,
            date: None,
            sku: "A".to_string(),
            on_hand,
        };
        let inventory = RowSet::new(vec![
            snap(Some(day(2024, 1, 5)), Some(10.0)),
            snap(Some(day(2024, 1, 9)), Some(30.0)),
            snap(Some(day(2024, 1, 9)), Some(40.0)),
            snap(Some(day(2024, 1, 2)), Some(99.0)),
            snap(None, Some(500.0)),
        ]);
        let sales = RowSet::new(vec![
            sale(day(2024, 1, 9), "A", Some(4.0)),
            sale(day(2024, 1, 8), "A", Some(4.0)),
        ]);
        let cover = compute_days_cover(&cache, &inventory, &sales, "A");
        assert_eq!(cover.on_hand, 40.0);
        assert_eq!(cover.velocity, 4.0);
        assert!((cover.days_cover - 10.0).abs() < 1e-6);
    }

    #[test]
    fn test_days_cover_unbounded_without_sales() {
        let cache = MetricCache::new();
        let inventory = RowSet::new(vec![InventoryRow {
            snapshot_date: Some(day(2024, 1, 5)),
            date: None,
            sku: "A".to_string(),
            on_hand: Some(12.0),
        }]);
        let sales = RowSet::new(vec![sale(day(2024, 1, 5), "A", Some(0.0))]);
        let cover = compute_days_cover(&cache, &inventory, &sales, "A");
        assert_eq!(cover.velocity, 0.0);
        assert!(cover.days_cover.is_infinite() && cover.days_cover > 0.0);
    }

    #[test]
    fn test_cache_hit_matches_miss() {
        let cache = MetricCache::new();
        let sales = forty_days_of_sales();
        let first = compute_velocity14(&cache, &sales, "SKU1");
        let second = compute_velocity14(&cache, &sales, "SKU1");
        assert_eq!(first, second);

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);

        // Same length and latest date but different contents must not collide.
        let mut rows = forty_days_of_sales().into_rows();
        rows[5].units = Some(1000.0);
        let altered = RowSet::new(rows);
        let fresh = compute_velocity14(&MetricCache::new(), &altered, "SKU1");
        let via_cache = compute_velocity14(&cache, &altered, "SKU1");
        assert_eq!(fresh, via_cache);
        assert_ne!(first, via_cache);
    }

    #[test]
    fn test_cache_is_bounded() {
        let cache = MetricCache::with_capacity(2);
        let sales = forty_days_of_sales();
        for sku in ["A", "B", "C", "D"] {
            compute_velocity14(&cache, &sales, sku);
        }
        assert_eq!(cache.stats().entries, 2);
        cache.clear();
        assert_eq!(cache.stats().entries, 0);
    }
}
