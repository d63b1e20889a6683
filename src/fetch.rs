use std::time::Duration;

use crate::clients::retail_prices::{
    PageError, PageRequest, PriceApi, PriceQuery, RetailPricePage,
};
use crate::config::ScannerConfig;
use crate::error::{ScanError, ScanResult};

#[derive(Debug, Clone)]
pub struct FetchOptions {
    /// 0 follows every continuation link.
    pub max_pages: u32,
    pub page_delay: Duration,
    pub retry_once: bool,
    pub retry_backoff: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            max_pages: 0,
            page_delay: Duration::from_millis(300),
            retry_once: true,
            retry_backoff: Duration::from_millis(2_000),
        }
    }
}

impl FetchOptions {
    pub fn from_config(cfg: &ScannerConfig) -> Self {
        Self {
            max_pages: cfg.max_pages,
            page_delay: Duration::from_millis(cfg.page_delay_ms),
            retry_once: cfg.retry_once,
            retry_backoff: Duration::from_millis(cfg.retry_backoff_ms),
        }
    }
}

#[derive(Debug)]
enum Cursor {
    Start,
    Next(String),
    Done,
}

/// Lazy walk over the pages of one filter set. Each `next_page` call issues at
/// most one request (plus one retry); once exhausted or failed the stream only
/// yields `None`.
#[derive(Debug)]
pub struct PageStream<'a, A> {
    api: &'a A,
    query: PriceQuery,
    options: FetchOptions,
    cursor: Cursor,
    pages_fetched: u32,
}

impl<'a, A: PriceApi> PageStream<'a, A> {
    pub fn new(api: &'a A, query: PriceQuery, options: FetchOptions) -> Self {
        Self {
            api,
            query,
            options,
            cursor: Cursor::Start,
            pages_fetched: 0,
        }
    }

    pub fn filter(&self) -> &str {
        &self.query.filter
    }

    pub fn pages_fetched(&self) -> u32 {
        self.pages_fetched
    }

    pub async fn next_page(&mut self) -> ScanResult<Option<RetailPricePage>> {
        let request = match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Done => return Ok(None),
            Cursor::Start => PageRequest::First(self.query.clone()),
            Cursor::Next(link) => {
                if self.options.max_pages > 0 && self.pages_fetched >= self.options.max_pages {
                    tracing::info!(
                        target: "fetch",
                        filter = %self.query.filter,
                        max_pages = self.options.max_pages,
                        "page limit reached; stopping before continuation"
                    );
                    return Ok(None);
                }
                if !self.options.page_delay.is_zero() {
                    tokio::time::sleep(self.options.page_delay).await;
                }
                PageRequest::Next(link)
            }
        };

        let page = self.request_with_retry(&request).await?;
        self.pages_fetched += 1;

        tracing::debug!(
            target: "fetch",
            filter = %self.query.filter,
            page = self.pages_fetched,
            items = page.items.len(),
            has_next = page.continuation().is_some(),
            "retail prices page received"
        );

        if !page.billing_currency_matches(&self.query.currency_code) {
            tracing::warn!(
                target: "fetch",
                filter = %self.query.filter,
                requested = %self.query.currency_code,
                billing_currency = page.billing_currency.as_deref().unwrap_or(""),
                "page billed in a different currency than requested"
            );
        }

        if let Some(link) = page.continuation() {
            self.cursor = Cursor::Next(link.to_string());
        }
        Ok(Some(page))
    }

    async fn request_with_retry(&self, request: &PageRequest) -> ScanResult<RetailPricePage> {
        let err = match self.api.get_page(request).await {
            Ok(page) => return Ok(page),
            Err(err) => err,
        };

        if !(self.options.retry_once && err.transient) {
            return Err(self.fetch_failed(err));
        }

        tracing::warn!(
            target: "fetch",
            filter = %self.query.filter,
            status = ?err.status,
            error = %err.message,
            backoff_ms = self.options.retry_backoff.as_millis() as u64,
            "transient page failure; retrying once"
        );
        if !self.options.retry_backoff.is_zero() {
            tokio::time::sleep(self.options.retry_backoff).await;
        }

        self.api
            .get_page(request)
            .await
            .map_err(|err| self.fetch_failed(err))
    }

    fn fetch_failed(&self, err: PageError) -> ScanError {
        ScanError::FetchFailed {
            filter: self.query.filter.clone(),
            status: err.status,
            message: err.message,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{item, no_wait, FakePriceApi, FIRST};
    use super::*;
    use crate::clients::retail_prices::RawPriceItem;

    fn query() -> PriceQuery {
        PriceQuery::virtual_machines("USD", None, None)
    }

    async fn fetch_all(
        api: &FakePriceApi,
        query: PriceQuery,
        options: FetchOptions,
    ) -> ScanResult<Vec<RawPriceItem>> {
        let mut stream = PageStream::new(api, query, options);
        let mut items = Vec::new();
        while let Some(page) = stream.next_page().await? {
            items.extend(page.items);
        }
        Ok(items)
    }

    fn meter_ids(items: &[RawPriceItem]) -> Vec<String> {
        items
            .iter()
            .map(|i| i.meter_id.clone().unwrap_or_default())
            .collect()
    }

    #[tokio::test]
    async fn follows_continuation_links_in_order() {
        let api = FakePriceApi::default();
        api.page(FIRST, vec![item("a"), item("b")], Some("token-2"));
        api.page("token-2", vec![item("c")], Some("token-3"));
        api.page("token-3", vec![item("d"), item("e")], None);

        let items = fetch_all(&api, query(), no_wait()).await.unwrap();
        assert_eq!(meter_ids(&items), vec!["a", "b", "c", "d", "e"]);
        assert_eq!(api.request_count(), 3);

        let requests = api.requests.borrow();
        assert!(matches!(&requests[0], PageRequest::First(q) if q.filter == query().filter));
        assert_eq!(requests[1], PageRequest::Next("token-2".to_string()));
        assert_eq!(requests[2], PageRequest::Next("token-3".to_string()));
    }

    #[tokio::test]
    async fn stream_is_lazy_and_not_restartable() {
        let api = FakePriceApi::default();
        api.page(FIRST, vec![item("a")], Some("token-2"));
        api.page("token-2", vec![item("b")], Some(""));

        let mut stream = PageStream::new(&api, query(), no_wait());
        assert_eq!(api.request_count(), 0);

        assert!(stream.next_page().await.unwrap().is_some());
        assert_eq!(api.request_count(), 1);
        assert!(stream.next_page().await.unwrap().is_some());
        // An empty continuation link ends the walk.
        assert!(stream.next_page().await.unwrap().is_none());
        assert!(stream.next_page().await.unwrap().is_none());
        assert_eq!(api.request_count(), 2);
        assert_eq!(stream.pages_fetched(), 2);
    }

    #[tokio::test]
    async fn max_pages_caps_the_walk() {
        let api = FakePriceApi::default();
        api.page(FIRST, vec![item("a")], Some("token-2"));
        api.page("token-2", vec![item("b")], Some("token-3"));
        api.page("token-3", vec![item("c")], None);

        let options = FetchOptions {
            max_pages: 2,
            ..no_wait()
        };
        let items = fetch_all(&api, query(), options).await.unwrap();
        assert_eq!(meter_ids(&items), vec!["a", "b"]);
        assert_eq!(api.request_count(), 2);
    }

    #[tokio::test]
    async fn failing_page_aborts_with_filter_and_status() {
        let api = FakePriceApi::default();
        api.page(FIRST, vec![item("a")], Some("token-2"));
        api.respond(
            "token-2",
            Err(PageError {
                status: Some(400),
                message: "bad request".to_string(),
                transient: false,
            }),
        );

        let mut stream = PageStream::new(&api, query(), no_wait());
        assert!(stream.next_page().await.unwrap().is_some());
        let err = stream.next_page().await.unwrap_err();
        match err {
            ScanError::FetchFailed {
                filter, status, ..
            } => {
                assert_eq!(filter, "serviceName eq 'Virtual Machines'");
                assert_eq!(status, Some(400));
            }
            other => panic!("expected FetchFailed, got {other:?}"),
        }
        // Non-transient failures are not retried and the stream stays finished.
        assert_eq!(api.request_count(), 2);
        assert!(stream.next_page().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn transient_failure_is_retried_once() {
        let api = FakePriceApi::default();
        api.respond(
            FIRST,
            Err(PageError {
                status: Some(503),
                message: "busy".to_string(),
                transient: true,
            }),
        );
        api.page(FIRST, vec![item("a")], None);

        let items = fetch_all(&api, query(), no_wait()).await.unwrap();
        assert_eq!(meter_ids(&items), vec!["a"]);
        assert_eq!(api.request_count(), 2);
    }

    #[tokio::test]
    async fn second_transient_failure_gives_up() {
        let api = FakePriceApi::default();
        for _ in 0..2 {
            api.respond(
                FIRST,
                Err(PageError {
                    status: None,
                    message: "timed out".to_string(),
                    transient: true,
                }),
            );
        }
        api.page(FIRST, vec![item("never")], None);

        let err = fetch_all(&api, query(), no_wait()).await.unwrap_err();
        assert!(matches!(err, ScanError::FetchFailed { status: None, .. }));
        assert_eq!(api.request_count(), 2);
    }

    #[tokio::test]
    async fn retry_can_be_disabled() {
        let api = FakePriceApi::default();
        api.respond(
            FIRST,
            Err(PageError {
                status: Some(429),
                message: "slow down".to_string(),
                transient: true,
            }),
        );
        let options = FetchOptions {
            retry_once: false,
            ..no_wait()
        };
        let err = fetch_all(&api, query(), options).await.unwrap_err();
        assert!(matches!(err, ScanError::FetchFailed { status: Some(429), .. }));
        assert_eq!(api.request_count(), 1);
    }
}
