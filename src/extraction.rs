//! Projects uploaded files into typed row lists.
//!
//! Extraction never fails: files that are missing produce empty lists, and
//! records without their identifying keys are dropped.

use crate::schema::{AdRow, InventoryRow, ParsedFile, RawRecord, ReturnsRow, SalesRow};
use crate::utils::{cell_text, coerce_number, parse_day};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowKind {
    Sales,
    Returns,
    Inventory,
    AdSpend,
}

impl RowKind {
    /// File-name fragment identifying this kind, matched case-insensitively.
    pub fn file_pattern(self) -> &'static str {
        match self {
            RowKind::Sales => "sales_daily",
            RowKind::Returns => "returns_daily",
            RowKind::Inventory => "inventory_snapshot",
            RowKind::AdSpend => "ad_spend",
        }
    }

    pub fn matches(self, file_name: &str) -> bool {
        file_name.to_lowercase().contains(self.file_pattern())
    }
}

/// The four row lists extracted from one set of uploads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractedRows {
    pub sales: Vec<SalesRow>,
    pub returns: Vec<ReturnsRow>,
    pub inventory: Vec<InventoryRow>,
    pub ads: Vec<AdRow>,
}

impl ExtractedRows {
    pub fn from_files(files: &[ParsedFile]) -> Self {
        let rows = Self {
            sales: extract_sales(files),
            returns: extract_returns(files),
            inventory: extract_inventory(files),
            ads: extract_ads(files),
        };
        debug!(
            "Extracted {} sales, {} returns, {} inventory and {} ad rows from {} files",
            rows.sales.len(),
            rows.returns.len(),
            rows.inventory.len(),
            rows.ads.len(),
            files.len()
        );
        rows
    }
}

/// Rows of a single kind, as returned by [`extract`].
#[derive(Debug, Clone, PartialEq)]
pub enum RowList {
    Sales(Vec<SalesRow>),
    Returns(Vec<ReturnsRow>),
    Inventory(Vec<InventoryRow>),
    AdSpend(Vec<AdRow>),
}

impl RowList {
    pub fn kind(&self) -> RowKind {
        match self {
            RowList::Sales(_) => RowKind::Sales,
            RowList::Returns(_) => RowKind::Returns,
            RowList::Inventory(_) => RowKind::Inventory,
            RowList::AdSpend(_) => RowKind::AdSpend,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RowList::Sales(rows) => rows.len(),
            RowList::Returns(rows) => rows.len(),
            RowList::Inventory(rows) => rows.len(),
            RowList::AdSpend(rows) => rows.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub fn extract(files: &[ParsedFile], kind: RowKind) -> RowList {
    match kind {
        RowKind::Sales => RowList::Sales(extract_sales(files)),
        RowKind::Returns => RowList::Returns(extract_returns(files)),
        RowKind::Inventory => RowList::Inventory(extract_inventory(files)),
        RowKind::AdSpend => RowList::AdSpend(extract_ads(files)),
    }
}

/// The first file whose name matches `kind`.
pub fn find_file(files: &[ParsedFile], kind: RowKind) -> Option<&ParsedFile> {
    files.iter().find(|f| kind.matches(&f.name))
}

fn records_for(files: &[ParsedFile], kind: RowKind) -> &[RawRecord] {
    find_file(files, kind)
        .map(|f| f.retained_rows.as_slice())
        .unwrap_or_default()
}

fn first_present(record: &RawRecord, keys: &[&str]) -> String {
    keys.iter()
        .map(|key| cell_text(record.get(*key)))
        .find(|text| !text.is_empty())
        .unwrap_or_default()
}

pub fn extract_sales(files: &[ParsedFile]) -> Vec<SalesRow> {
    records_for(files, RowKind::Sales)
        .iter()
        .filter_map(|r| {
            let sku = first_present(r, &["sku", "SKU"]);
            let date = parse_day(&first_present(r, &["date", "Date"]))?;
            if sku.is_empty() {
                return None;
            }
            Some(SalesRow {
                date,
                sku,
                units: coerce_number(r.get("units")),
                revenue: coerce_number(r.get("revenue")),
            })
        })
        .collect()
}

pub fn extract_returns(files: &[ParsedFile]) -> Vec<ReturnsRow> {
    records_for(files, RowKind::Returns)
        .iter()
        .filter_map(|r| {
            let sku = cell_text(r.get("sku"));
            let date = parse_day(&cell_text(r.get("date")))?;
            if sku.is_empty() {
                return None;
            }
            Some(ReturnsRow {
                date,
                sku,
                units_returned: coerce_number(r.get("units_returned")),
            })
        })
        .collect()
}

/// Inventory rows only require a SKU; undated snapshots are kept but never
/// selected as the latest snapshot. A non-empty `snapshot_date` cell shadows
/// `date` even when it does not parse.
pub fn extract_inventory(files: &[ParsedFile]) -> Vec<InventoryRow> {
    records_for(files, RowKind::Inventory)
        .iter()
        .filter_map(|r| {
            let sku = cell_text(r.get("sku"));
            if sku.is_empty() {
                return None;
            }
            let snapshot_text = cell_text(r.get("snapshot_date"));
            let date = if snapshot_text.is_empty() {
                parse_day(&cell_text(r.get("date")))
            } else {
                None
            };
            Some(InventoryRow {
                snapshot_date: parse_day(&snapshot_text),
                date,
                sku,
                on_hand: coerce_number(r.get("on_hand")),
            })
        })
        .collect()
}

pub fn extract_ads(files: &[ParsedFile]) -> Vec<AdRow> {
    records_for(files, RowKind::AdSpend)
        .iter()
        .filter_map(|r| {
            let campaign = cell_text(r.get("campaign"));
            let date = parse_day(&cell_text(r.get("date")))?;
            if campaign.is_empty() {
                return None;
            }
            Some(AdRow {
                date,
                campaign,
                spend: coerce_number(r.get("spend")),
                attributed_revenue: coerce_number(r.get("attributed_revenue")),
            })
        })
        .collect()
}
