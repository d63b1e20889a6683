use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum OsType {
    Linux,
    Windows,
}

impl fmt::Display for OsType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OsType::Linux => f.write_str("Linux"),
            OsType::Windows => f.write_str("Windows"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PriceRecord {
    pub sku: String,
    pub region: String,
    pub os: OsType,
    pub vm_family: String,
    pub vcpus: u32,
    #[serde(rename = "memoryGiB")]
    pub memory_gib: f64,
    pub price_per_hour: f64,
    pub currency: String,
    pub is_spot: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meter_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub effective_start_date: Option<String>,
}

/// Identity of a record within a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordKey {
    pub sku: String,
    pub region: String,
    pub os: OsType,
    pub is_spot: bool,
}

impl PriceRecord {
    pub fn key(&self) -> RecordKey {
        RecordKey {
            sku: self.sku.clone(),
            region: self.region.clone(),
            os: self.os,
            is_spot: self.is_spot,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dataset {
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub generated_at: Option<OffsetDateTime>,
    #[serde(default)]
    pub records: Vec<PriceRecord>,
}

impl Dataset {
    pub fn empty() -> Self {
        Self {
            generated_at: None,
            records: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Aggregates stored next to the records for the dashboard header.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSummary {
    pub count: usize,
    pub regions_count: usize,
    pub regions: Vec<String>,
    pub families_count: usize,
    pub families: Vec<String>,
    pub os_types: Vec<String>,
    pub spot_count: usize,
    pub avg_price_per_hour: f64,
    pub min_price_per_hour: f64,
    pub max_price_per_hour: f64,
}

impl DatasetSummary {
    pub fn from_records(records: &[PriceRecord]) -> Self {
        if records.is_empty() {
            return Self::default();
        }

        let regions: BTreeSet<&str> = records.iter().map(|r| r.region.as_str()).collect();
        let families: BTreeSet<&str> = records
            .iter()
            .map(|r| r.vm_family.as_str())
            .filter(|f| !f.is_empty())
            .collect();
        let os_types: BTreeSet<OsType> = records.iter().map(|r| r.os).collect();

        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for record in records {
            sum += record.price_per_hour;
            min = min.min(record.price_per_hour);
            max = max.max(record.price_per_hour);
        }

        Self {
            count: records.len(),
            regions_count: regions.len(),
            regions: regions.into_iter().map(str::to_string).collect(),
            families_count: families.len(),
            families: families.into_iter().map(str::to_string).collect(),
            os_types: os_types.into_iter().map(|os| os.to_string()).collect(),
            spot_count: records.iter().filter(|r| r.is_spot).count(),
            avg_price_per_hour: sum / records.len() as f64,
            min_price_per_hour: min,
            max_price_per_hour: max,
        }
    }
}

impl fmt::Display for DatasetSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Total VMs: {}", self.count)?;
        if self.count == 0 {
            return Ok(());
        }
        write!(f, "\nRegions: {}", self.regions_count)?;
        write!(f, "\nFamilies: {}", self.families_count)?;
        write!(f, "\nSpot instances: {}", self.spot_count)?;
        write!(f, "\nAvg price: {:.6}/hr", self.avg_price_per_hour)?;
        write!(
            f,
            "\nPrice range: {:.6} - {:.6}/hr",
            self.min_price_per_hour, self.max_price_per_hour
        )
    }
}
