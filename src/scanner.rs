use std::collections::BTreeMap;
use std::fmt;

use time::OffsetDateTime;

use crate::clients::retail_prices::{PriceApi, PriceQuery};
use crate::config::AppConfig;
use crate::error::ScanResult;
use crate::fetch::{FetchOptions, PageStream};
use crate::model::{DatasetSummary, PriceRecord};
use crate::normalize::{normalize, NormalizeOptions, Selection, SkipReason};
use crate::reconcile::{prune_stale, reconcile, ReconcileSummary};
use crate::store::DatasetStore;
use crate::time::days_before;

/// Counters for one run. Filled as the run progresses, so they are still
/// meaningful when the run fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub filter_sets: usize,
    pub filter_sets_failed: usize,
    pub pages: u64,
    pub items_fetched: u64,
    pub accepted: u64,
    pub skipped: BTreeMap<SkipReason, u64>,
}

impl ScanStats {
    fn record_skip(&mut self, reason: SkipReason) {
        *self.skipped.entry(reason).or_default() += 1;
    }

    pub fn skipped_total(&self) -> u64 {
        self.skipped.values().sum()
    }

    pub fn malformed_total(&self) -> u64 {
        self.skipped
            .iter()
            .filter(|(reason, _)| reason.is_malformed())
            .map(|(_, n)| n)
            .sum()
    }
}

impl fmt::Display for ScanStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Filter sets: {} ({} failed)",
            self.filter_sets, self.filter_sets_failed
        )?;
        writeln!(f, "Pages fetched: {}", self.pages)?;
        writeln!(f, "Items fetched: {}", self.items_fetched)?;
        writeln!(f, "Records accepted: {}", self.accepted)?;
        write!(
            f,
            "Items skipped: {} ({} malformed)",
            self.skipped_total(),
            self.malformed_total()
        )?;
        for (reason, n) in &self.skipped {
            write!(f, "\n  {reason}: {n}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanReport {
    pub reconcile: ReconcileSummary,
    pub pruned: usize,
    pub records: usize,
    pub generated_at: OffsetDateTime,
    pub summary: DatasetSummary,
}

/// Fetch, normalize, reconcile and write, in that order. Nothing is written
/// unless every filter set was fetched completely.
pub struct PriceScanner<A> {
    api: A,
    queries: Vec<PriceQuery>,
    fetch: FetchOptions,
    normalize: NormalizeOptions,
    selection: Selection,
    store: DatasetStore,
    prune_after_days: Option<u32>,
}

impl<A: PriceApi> PriceScanner<A> {
    pub fn new(api: A, cfg: &AppConfig) -> Self {
        let store = DatasetStore::new(cfg.store.output_path.clone())
            .with_source(cfg.scanner.api_url.clone());
        Self {
            api,
            queries: build_queries(cfg),
            fetch: FetchOptions::from_config(&cfg.scanner),
            normalize: NormalizeOptions {
                max_price_per_hour: cfg.scanner.max_price_per_hour,
            },
            selection: Selection::from_config(&cfg.scanner),
            store,
            prune_after_days: cfg.store.prune_after_days,
        }
    }

    pub fn queries(&self) -> &[PriceQuery] {
        &self.queries
    }

    pub async fn run(&self, stats: &mut ScanStats, now: OffsetDateTime) -> ScanResult<ScanReport> {
        let existing = self.store.load()?;
        let mut incoming = Vec::new();

        for query in &self.queries {
            stats.filter_sets += 1;
            if let Err(err) = self.collect(query, now, stats, &mut incoming).await {
                stats.filter_sets_failed += 1;
                tracing::error!(
                    target: "scanner",
                    filter = %query.filter,
                    error = %err,
                    "fetch aborted; dataset left untouched"
                );
                return Err(err);
            }
        }

        let (mut merged, summary) = reconcile(existing, incoming);
        tracing::info!(
            target: "scanner",
            inserted = summary.inserted,
            replaced = summary.replaced,
            retained = summary.retained,
            "reconciled run into dataset"
        );

        let pruned = match self.prune_after_days {
            Some(days) => {
                let pruned = prune_stale(&mut merged, days_before(now, days));
                tracing::info!(target: "scanner", pruned, days, "pruned stale records");
                pruned
            }
            None => 0,
        };

        self.store.write(&mut merged, now)?;

        Ok(ScanReport {
            reconcile: summary,
            pruned,
            records: merged.len(),
            generated_at: merged.generated_at.unwrap_or(now),
            summary: DatasetSummary::from_records(&merged.records),
        })
    }

    async fn collect(
        &self,
        query: &PriceQuery,
        now: OffsetDateTime,
        stats: &mut ScanStats,
        out: &mut Vec<PriceRecord>,
    ) -> ScanResult<()> {
        tracing::info!(target: "scanner", filter = %query.filter, "fetching filter set");
        let mut stream = PageStream::new(&self.api, query.clone(), self.fetch.clone());

        while let Some(page) = stream.next_page().await? {
            stats.pages += 1;
            for raw in &page.items {
                stats.items_fetched += 1;
                let admitted = normalize(raw, &self.normalize, now)
                    .and_then(|record| self.selection.admits(&record).map(|()| record));
                match admitted {
                    Ok(record) => {
                        stats.accepted += 1;
                        out.push(record);
                    }
                    Err(reason) => {
                        if reason.is_malformed() {
                            tracing::debug!(
                                target: "normalize",
                                reason = %reason,
                                meter_id = raw.meter_id.as_deref().unwrap_or(""),
                                sku = raw.arm_sku_name.as_deref().unwrap_or(""),
                                "skipping malformed record"
                            );
                        }
                        stats.record_skip(reason);
                    }
                }
            }
        }

        tracing::info!(
            target: "scanner",
            filter = %query.filter,
            pages = stream.pages_fetched(),
            "filter set complete"
        );
        Ok(())
    }
}

/// One query per configured region (deduplicated, in order), or a single
/// catalog-wide query when no regions are set.
pub fn build_queries(cfg: &AppConfig) -> Vec<PriceQuery> {
    let scanner = &cfg.scanner;
    let api_version = scanner.api_version.as_deref();
    if scanner.regions.is_empty() {
        return vec![PriceQuery::virtual_machines(
            &scanner.currency_code,
            api_version,
            None,
        )];
    }

    let mut seen: Vec<String> = Vec::new();
    for region in &scanner.regions {
        let region = region.to_ascii_lowercase();
        if !seen.contains(&region) {
            seen.push(region);
        }
    }
    seen.iter()
        .map(|region| {
            PriceQuery::virtual_machines(&scanner.currency_code, api_version, Some(region.as_str()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::clients::retail_prices::PageError;
    use crate::error::ScanError;
    use crate::fetch::testing::{FakePriceApi, FIRST};
    use crate::model::{Dataset, OsType};
    use crate::normalize::testing::vm_item;
    use crate::store::testing::temp_dir;
    use time::macros::datetime;

    fn config(output: std::path::PathBuf) -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.store.output_path = output;
        cfg.scanner.page_delay_ms = 0;
        cfg.scanner.retry_backoff_ms = 0;
        cfg
    }

    fn seed(store: &DatasetStore, generated_at: OffsetDateTime) {
        let mut existing = vm_item("Standard_D2s_v3", "eastus", 0.096);
        existing.meter_id = Some("old".to_string());
        let record = normalize(&existing, &NormalizeOptions::default(), generated_at).unwrap();
        let mut ds = Dataset {
            generated_at: None,
            records: vec![record],
        };
        store.write(&mut ds, generated_at).unwrap();
    }

    #[tokio::test]
    async fn end_to_end_updates_price_and_adds_region() {
        let dir = temp_dir("scanner_e2e");
        let cfg = config(dir.join("prices.json"));
        let store = DatasetStore::new(&cfg.store.output_path);
        let before = datetime!(2026-01-01 00:00 UTC);
        seed(&store, before);

        let api = FakePriceApi::default();
        api.page(
            FIRST,
            vec![
                vm_item("Standard_D2s_v3", "eastus", 0.104),
                vm_item("Standard_D2s_v3", "westus", 0.11),
            ],
            None,
        );

        let scanner = PriceScanner::new(api, &cfg);
        let mut stats = ScanStats::default();
        let now = datetime!(2026-03-01 00:00 UTC);
        let report = scanner.run(&mut stats, now).await.unwrap();

        assert_eq!(report.records, 2);
        assert_eq!(report.reconcile.replaced, 1);
        assert_eq!(report.reconcile.inserted, 1);
        assert_eq!(report.generated_at, now);
        assert_eq!(report.summary.count, 2);
        assert_eq!(report.summary.regions, vec!["eastus", "westus"]);
        assert_eq!(report.summary.min_price_per_hour, 0.104);
        assert_eq!(report.summary.max_price_per_hour, 0.11);

        let ds = store.load().unwrap();
        assert_eq!(ds.len(), 2);
        let eastus = ds
            .records
            .iter()
            .find(|r| r.region == "eastus")
            .expect("eastus record");
        assert_eq!(eastus.sku, "D2s_v3");
        assert_eq!(eastus.os, OsType::Linux);
        assert!(!eastus.is_spot);
        assert_eq!(eastus.price_per_hour, 0.104);
        assert!(ds.generated_at.unwrap() > before);

        assert_eq!(stats.pages, 1);
        assert_eq!(stats.items_fetched, 2);
        assert_eq!(stats.accepted, 2);
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn skipped_items_are_counted_by_reason() {
        let dir = temp_dir("scanner_skips");
        let cfg = config(dir.join("prices.json"));

        let mut no_price = vm_item("Standard_D4s_v3", "eastus", 0.2);
        no_price.retail_price = None;
        no_price.unit_price = None;
        let mut monthly = vm_item("Standard_D4s_v3", "eastus", 0.2);
        monthly.unit_of_measure = Some("1/Month".to_string());
        let mut spot = vm_item("Standard_D4s_v3", "eastus", 0.05);
        spot.sku_name = Some("D4s v3 Spot".to_string());

        let api = FakePriceApi::default();
        api.page(FIRST, vec![no_price, monthly], Some("next"));
        api.page(
            "next",
            vec![spot, vm_item("Standard_D4s_v3", "eastus", 0.192)],
            None,
        );

        let scanner = PriceScanner::new(api, &cfg);
        let mut stats = ScanStats::default();
        let report = scanner
            .run(&mut stats, datetime!(2026-03-01 00:00 UTC))
            .await
            .unwrap();

        assert_eq!(report.records, 1);
        assert_eq!(stats.pages, 2);
        assert_eq!(stats.items_fetched, 4);
        assert_eq!(stats.accepted, 1);
        assert_eq!(stats.skipped.get(&SkipReason::MissingPrice), Some(&1));
        assert_eq!(stats.skipped.get(&SkipReason::UnsupportedUnit), Some(&1));
        assert_eq!(stats.skipped.get(&SkipReason::SpotNotSelected), Some(&1));
        assert_eq!(stats.malformed_total(), 2);

        let summary = stats.to_string();
        assert!(summary.contains("missing_price: 1"), "{summary}");
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn fetch_failure_leaves_previous_file_untouched() {
        let dir = temp_dir("scanner_fetch_failure");
        let cfg = config(dir.join("prices.json"));
        let store = DatasetStore::new(&cfg.store.output_path);
        seed(&store, datetime!(2026-01-01 00:00 UTC));
        let before = fs::read_to_string(store.path()).unwrap();

        let api = FakePriceApi::default();
        api.page(
            FIRST,
            vec![vm_item("Standard_D2s_v3", "eastus", 0.5)],
            Some("next"),
        );
        api.respond(
            "next",
            Err(PageError {
                status: Some(500),
                message: "boom".to_string(),
                transient: false,
            }),
        );

        let scanner = PriceScanner::new(api, &cfg);
        let mut stats = ScanStats::default();
        let err = scanner
            .run(&mut stats, datetime!(2026-03-01 00:00 UTC))
            .await
            .unwrap_err();

        assert!(matches!(err, ScanError::FetchFailed { status: Some(500), .. }));
        assert_eq!(stats.filter_sets_failed, 1);
        assert_eq!(stats.items_fetched, 1);
        assert_eq!(fs::read_to_string(store.path()).unwrap(), before);
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn prune_window_removes_unrefreshed_records() {
        let dir = temp_dir("scanner_prune");
        let mut cfg = config(dir.join("prices.json"));
        cfg.store.prune_after_days = Some(30);
        let store = DatasetStore::new(&cfg.store.output_path);
        seed(&store, datetime!(2026-01-01 00:00 UTC));

        let api = FakePriceApi::default();
        api.page(
            FIRST,
            vec![vm_item("Standard_D2s_v3", "westus", 0.11)],
            None,
        );

        let scanner = PriceScanner::new(api, &cfg);
        let mut stats = ScanStats::default();
        let report = scanner
            .run(&mut stats, datetime!(2026-03-01 00:00 UTC))
            .await
            .unwrap();
        assert_eq!(report.pruned, 1);
        assert_eq!(report.records, 1);
        assert_eq!(store.load().unwrap().records[0].region, "westus");
        let _ = fs::remove_dir_all(dir);
    }

    #[tokio::test]
    async fn absent_records_are_retained_without_prune_window() {
        let dir = temp_dir("scanner_retain");
        let cfg = config(dir.join("prices.json"));
        let store = DatasetStore::new(&cfg.store.output_path);
        seed(&store, datetime!(2026-01-01 00:00 UTC));

        let api = FakePriceApi::default();
        api.page(FIRST, Vec::new(), None);

        let scanner = PriceScanner::new(api, &cfg);
        let mut stats = ScanStats::default();
        let report = scanner
            .run(&mut stats, datetime!(2026-03-01 00:00 UTC))
            .await
            .unwrap();
        assert_eq!(report.records, 1);
        assert_eq!(report.reconcile.retained, 1);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn queries_are_built_per_region() {
        let mut cfg = AppConfig::default();
        assert_eq!(build_queries(&cfg).len(), 1);

        cfg.scanner.regions = vec![
            "eastus".to_string(),
            "westus".to_string(),
            "eastus".to_string(),
        ];
        let queries = build_queries(&cfg);
        assert_eq!(queries.len(), 2);
        assert!(queries[0].filter.ends_with("armRegionName eq 'eastus'"));
        assert!(queries[1].filter.ends_with("armRegionName eq 'westus'"));
    }
}
