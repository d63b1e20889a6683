use std::fmt;

use time::OffsetDateTime;

use crate::clients::retail_prices::{RawPriceItem, VM_SERVICE_NAME};
use crate::config::{OsChoice, ScannerConfig};
use crate::model::{OsType, PriceRecord};
use crate::specs::resolve_specs;

const CONSUMPTION_PRICE_TYPE: &str = "Consumption";

const EXCLUDED_TERMS: &[&str] = &[
    "reservation",
    "sql",
    "database",
    "storage",
    "bandwidth",
    "snapshot",
    "backup",
    "oracle",
    "premium ssd",
    "managed disk",
];

const SPOT_MARKERS: &[&str] = &["spot", "low priority", "low-priority"];

const SKU_TIER_PREFIXES: &[&str] = &["Standard_", "Basic_"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SkipReason {
    NotVirtualMachine,
    NonConsumption,
    ExcludedProduct,
    UnsupportedUnit,
    MissingPrice,
    PriceOutOfRange,
    MalformedRegion,
    MalformedSku,
    MalformedCurrency,
    UnknownSpecs,
    OsNotSelected,
    SpotNotSelected,
    RegionNotSelected,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SkipReason::NotVirtualMachine => "not_virtual_machine",
            SkipReason::NonConsumption => "non_consumption",
            SkipReason::ExcludedProduct => "excluded_product",
            SkipReason::UnsupportedUnit => "unsupported_unit",
            SkipReason::MissingPrice => "missing_price",
            SkipReason::PriceOutOfRange => "price_out_of_range",
            SkipReason::MalformedRegion => "malformed_region",
            SkipReason::MalformedSku => "malformed_sku",
            SkipReason::MalformedCurrency => "malformed_currency",
            SkipReason::UnknownSpecs => "unknown_specs",
            SkipReason::OsNotSelected => "os_not_selected",
            SkipReason::SpotNotSelected => "spot_not_selected",
            SkipReason::RegionNotSelected => "region_not_selected",
        }
    }

    /// Record was unusable, as opposed to usable but outside this run's selection.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            SkipReason::UnsupportedUnit
                | SkipReason::MissingPrice
                | SkipReason::MalformedRegion
                | SkipReason::MalformedSku
                | SkipReason::MalformedCurrency
                | SkipReason::UnknownSpecs
        )
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    pub max_price_per_hour: f64,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            max_price_per_hour: 1_000.0,
        }
    }
}

/// Maps one catalog item to a price record. Pure: the result depends only on
/// the arguments.
pub fn normalize(
    raw: &RawPriceItem,
    options: &NormalizeOptions,
    observed_at: OffsetDateTime,
) -> Result<PriceRecord, SkipReason> {
    if raw.service_name.as_deref() != Some(VM_SERVICE_NAME) {
        return Err(SkipReason::NotVirtualMachine);
    }
    if let Some(price_type) = raw.price_type.as_deref() {
        if price_type != CONSUMPTION_PRICE_TYPE {
            return Err(SkipReason::NonConsumption);
        }
    }
    if !is_single_hour(raw.unit_of_measure.as_deref().unwrap_or_default()) {
        return Err(SkipReason::UnsupportedUnit);
    }

    let product_name = raw.product_name.as_deref().unwrap_or_default();
    let sku_name = raw.sku_name.as_deref().unwrap_or_default();
    let meter_name = raw.meter_name.as_deref().unwrap_or_default();
    let text = format!("{meter_name} {product_name} {sku_name}").to_ascii_lowercase();
    if EXCLUDED_TERMS.iter().any(|term| text.contains(term)) {
        return Err(SkipReason::ExcludedProduct);
    }

    let price = raw
        .retail_price
        .or(raw.unit_price)
        .filter(|p| p.is_finite() && *p >= 0.0)
        .ok_or(SkipReason::MissingPrice)?;
    if price > options.max_price_per_hour {
        return Err(SkipReason::PriceOutOfRange);
    }

    let currency = raw
        .currency_code
        .as_deref()
        .map(str::trim)
        .filter(|c| c.len() == 3 && c.chars().all(|ch| ch.is_ascii_alphabetic()))
        .ok_or(SkipReason::MalformedCurrency)?
        .to_ascii_uppercase();

    let region = raw
        .arm_region_name
        .as_deref()
        .map(|r| r.trim().to_ascii_lowercase())
        .filter(|r| is_arm_region(r))
        .ok_or(SkipReason::MalformedRegion)?;

    let arm_sku = raw
        .arm_sku_name
        .as_deref()
        .map(str::trim)
        .ok_or(SkipReason::MalformedSku)?;
    let sku = strip_tier_prefix(arm_sku);
    if !is_sku(sku) {
        return Err(SkipReason::MalformedSku);
    }

    let specs = resolve_specs(arm_sku).ok_or(SkipReason::UnknownSpecs)?.specs;
    if specs.vcpus == 0 {
        return Err(SkipReason::UnknownSpecs);
    }

    Ok(PriceRecord {
        sku: sku.to_string(),
        region,
        os: detect_os(product_name, sku_name),
        vm_family: vm_family(product_name, sku),
        vcpus: specs.vcpus,
        memory_gib: specs.memory_gib,
        price_per_hour: price,
        currency,
        is_spot: is_spot(sku_name, product_name),
        last_updated: observed_at,
        product_name: raw.product_name.clone(),
        meter_name: raw.meter_name.clone(),
        meter_id: raw.meter_id.clone(),
        effective_start_date: raw.effective_start_date.clone(),
    })
}

fn is_single_hour(unit: &str) -> bool {
    let unit = unit.trim().to_ascii_lowercase();
    let rest = unit.strip_prefix('1').map(str::trim_start).unwrap_or(&unit);
    rest == "hour" || rest == "hours"
}

fn is_arm_region(region: &str) -> bool {
    !region.is_empty()
        && region
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

fn strip_tier_prefix(arm_sku: &str) -> &str {
    SKU_TIER_PREFIXES
        .iter()
        .find_map(|prefix| arm_sku.strip_prefix(prefix))
        .unwrap_or(arm_sku)
}

fn is_sku(sku: &str) -> bool {
    !sku.is_empty()
        && sku
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Linux meters carry no OS marker in the catalog, so anything not Windows is Linux.
pub fn detect_os(product_name: &str, sku_name: &str) -> OsType {
    let text = format!("{product_name} {sku_name}").to_ascii_lowercase();
    if text.contains("windows") {
        OsType::Windows
    } else {
        OsType::Linux
    }
}

pub fn is_spot(sku_name: &str, product_name: &str) -> bool {
    let text = format!("{sku_name} {product_name}").to_ascii_lowercase();
    SPOT_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Series from the product name (`Virtual Machines DSv3 Series Windows` -> `DSv3`),
/// else derived from the SKU (`D2s_v3` -> `Dv3`).
pub fn vm_family(product_name: &str, sku: &str) -> String {
    if let Some(rest) = product_name.trim().strip_prefix("Virtual Machines ") {
        if let Some(idx) = rest.find(" Series") {
            let series = rest[..idx].trim();
            if !series.is_empty() {
                return series.to_string();
            }
        }
    }

    let letters: String = sku.chars().take_while(|c| c.is_ascii_alphabetic()).collect();
    let generation = sku
        .rsplit_once("_v")
        .map(|(_, g)| g)
        .filter(|g| !g.is_empty() && g.chars().all(|c| c.is_ascii_digit()));
    match generation {
        Some(g) => format!("{letters}v{g}"),
        None => letters,
    }
}

/// Run-level choices applied after normalization.
#[derive(Debug, Clone, Default)]
pub struct Selection {
    pub os: OsChoice,
    pub include_spot: bool,
    /// Empty admits every region.
    pub regions: Vec<String>,
}

impl Selection {
    pub fn from_config(cfg: &ScannerConfig) -> Self {
        Self {
            os: cfg.os,
            include_spot: cfg.include_spot,
            regions: cfg.regions.iter().map(|r| r.to_ascii_lowercase()).collect(),
        }
    }

    pub fn admits(&self, record: &PriceRecord) -> Result<(), SkipReason> {
        let os_ok = match self.os {
            OsChoice::Both => true,
            OsChoice::Linux => record.os == OsType::Linux,
            OsChoice::Windows => record.os == OsType::Windows,
        };
        if !os_ok {
            return Err(SkipReason::OsNotSelected);
        }
        if record.is_spot && !self.include_spot {
            return Err(SkipReason::SpotNotSelected);
        }
        if !self.regions.is_empty() && !self.regions.iter().any(|r| *r == record.region) {
            return Err(SkipReason::RegionNotSelected);
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    pub fn vm_item(arm_sku: &str, region: &str, price: f64) -> RawPriceItem {
        let sku_name = arm_sku
            .trim_start_matches("Standard_")
            .replace('_', " ");
        RawPriceItem {
            retail_price: Some(price),
            unit_price: Some(price),
            currency_code: Some("USD".to_string()),
            arm_region_name: Some(region.to_string()),
            effective_start_date: Some("2024-01-01T00:00:00Z".to_string()),
            meter_id: Some(format!("{arm_sku}-{region}")),
            meter_name: Some(sku_name.clone()),
            product_name: Some("Virtual Machines DSv3 Series".to_string()),
            sku_name: Some(sku_name),
            arm_sku_name: Some(arm_sku.to_string()),
            service_name: Some(VM_SERVICE_NAME.to_string()),
            unit_of_measure: Some("1 Hour".to_string()),
            price_type: Some("Consumption".to_string()),
        }
    }
}
