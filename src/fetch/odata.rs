// src/fetch/odata.rs

use serde::Deserialize;
use std::{collections::HashSet, fmt};
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::retry::{with_retry, GaveUp, RetryPolicy, Retryable};
use super::strategy::{FetchStrategy, HttpTransport, Transport};
use crate::config::{Config, SourceConfig};
use crate::error::{FetchError, TransportError};

/// One record exactly as the server delivered it.
pub type RawRecord = serde_json::Map<String, serde_json::Value>;

const SNIPPET_CHARS: usize = 200;

/// A single page of an OData feed.
#[derive(Debug, Deserialize)]
struct Page {
    value: Vec<RawRecord>,
    /// v3 feeds emit `odata.nextLink`, v4 feeds `@odata.nextLink`.
    #[serde(rename = "odata.nextLink", alias = "@odata.nextLink", default)]
    next_link: Option<String>,
}

/// Why one page attempt failed.
#[derive(Debug)]
enum PageError {
    Transport(TransportError),
    Malformed {
        snippet: String,
        source: serde_json::Error,
    },
}

impl fmt::Display for PageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageError::Transport(e) => write!(f, "{e}"),
            PageError::Malformed { source, .. } => write!(f, "malformed body: {source}"),
        }
    }
}

impl Retryable for PageError {
    fn is_retryable(&self) -> bool {
        match self {
            PageError::Transport(e) => e.is_retryable(),
            // a reset connection tends to truncate the body
            PageError::Malformed { .. } => true,
        }
    }
}

fn snippet(body: &str) -> String {
    body.chars().take(SNIPPET_CHARS).collect()
}

fn decode_page(body: &str) -> Result<Page, PageError> {
    serde_json::from_str(body).map_err(|source| PageError::Malformed {
        snippet: snippet(body),
        source,
    })
}

/// Build `<base>/<dataset>/<entity_set>?$format=json[&$select=a,b]`.
pub fn dataset_url(
    base_url: &str,
    source: &SourceConfig,
    select_fields: Option<&[String]>,
) -> Result<Url, FetchError> {
    let raw = format!(
        "{}/{}/{}",
        base_url.trim_end_matches('/'),
        source.dataset_id,
        source.entity_set
    );
    let mut url = Url::parse(&raw).map_err(|source| FetchError::Url { url: raw, source })?;
    {
        let mut q = url.query_pairs_mut();
        q.append_pair("$format", "json");
        if let Some(fields) = select_fields.filter(|f| !f.is_empty()) {
            q.append_pair("$select", &fields.join(","));
        }
    }
    Ok(url)
}

/// Resolve a continuation link and pin its scheme to the one in use.
fn next_url(current: &Url, link: &str, scheme: &str) -> Result<Url, FetchError> {
    let mut next = current.join(link).map_err(|source| FetchError::Url {
        url: link.to_string(),
        source,
    })?;
    if next.scheme() != scheme {
        debug!(from = next.scheme(), to = scheme, "Rewriting continuation scheme");
        // http <-> https always succeeds
        let _ = next.set_scheme(scheme);
    }
    Ok(next)
}

/// Paginated, retrying reader for one OData dataset.
pub struct Fetcher<T = HttpTransport> {
    transport: T,
    source: SourceConfig,
    retry: RetryPolicy,
}

impl Fetcher<HttpTransport> {
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        let transport = HttpTransport::new(&config.source.user_agent, config.retry.timeout())?;
        Ok(Self::with_transport(
            transport,
            config.source.clone(),
            config.retry.policy(),
        ))
    }
}

impl<T: Transport> Fetcher<T> {
    pub fn with_transport(transport: T, source: SourceConfig, retry: RetryPolicy) -> Self {
        Self {
            transport,
            source,
            retry,
        }
    }

    pub fn source(&self) -> &SourceConfig {
        &self.source
    }

    /// Fetch every page of the dataset.
    ///
    /// The primary strategy is tried first; if it fails anywhere, the whole
    /// fetch restarts once from page one with the fallback strategy.
    /// `select_fields = None` asks for every column.
    #[instrument(level = "info", skip(self, select_fields), fields(dataset = %self.source.dataset_id))]
    pub fn fetch_all(&self, select_fields: Option<&[String]>) -> Result<Vec<RawRecord>, FetchError> {
        let [primary, fallback] = FetchStrategy::ORDER;
        let primary_err = match self.fetch_with(primary, select_fields) {
            Ok(records) => return Ok(records),
            Err(e) => e,
        };

        warn!(error = %primary_err, "Primary fetch failed; switching to fallback transport");
        self.fetch_with(fallback, select_fields)
            .map_err(|fallback_err| FetchError::AllStrategiesFailed {
                primary: Box::new(primary_err),
                fallback: Box::new(fallback_err),
            })
    }

    /// Walk all pages with one strategy.
    fn fetch_with(
        &self,
        strategy: FetchStrategy,
        select_fields: Option<&[String]>,
    ) -> Result<Vec<RawRecord>, FetchError> {
        let mut url = dataset_url(strategy.base_url(&self.source), &self.source, select_fields)?;
        let scheme = url.scheme().to_string();
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        let mut pages = 0usize;

        loop {
            if !seen.insert(url.to_string()) {
                return Err(FetchError::PaginationLoop {
                    url: url.to_string(),
                });
            }

            let page = self.fetch_page(strategy, &url)?;
            pages += 1;
            records.extend(page.value);
            debug!(%strategy, page = pages, rows = records.len(), "Fetched page");

            match page.next_link {
                Some(link) if !link.is_empty() => url = next_url(&url, &link, &scheme)?,
                _ => break,
            }
        }

        info!(%strategy, pages, rows = records.len(), "Fetch complete");
        Ok(records)
    }

    fn fetch_page(&self, strategy: FetchStrategy, url: &Url) -> Result<Page, FetchError> {
        with_retry(&self.retry, url.as_str(), |_| {
            let body = self
                .transport
                .get_text(strategy, url)
                .map_err(PageError::Transport)?;
            decode_page(&body)
        })
        .map_err(|GaveUp { attempts, last }| match last {
            PageError::Malformed { snippet, source } => FetchError::MalformedPage {
                url: url.to_string(),
                attempts,
                snippet,
                source,
            },
            PageError::Transport(source) if source.is_retryable() => {
                FetchError::RetriesExhausted {
                    url: url.to_string(),
                    attempts,
                    source,
                }
            }
            PageError::Transport(source) => FetchError::Rejected {
                url: url.to_string(),
                source,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::{cell::RefCell, collections::HashMap, collections::VecDeque};

    type Reply = Result<String, TransportError>;

    /// Replies are queued per (strategy, url); unknown requests time out.
    #[derive(Default)]
    struct Scripted {
        replies: RefCell<HashMap<(FetchStrategy, String), VecDeque<Reply>>>,
        calls: RefCell<Vec<(FetchStrategy, String)>>,
    }

    impl Scripted {
        fn push(&self, strategy: FetchStrategy, url: &Url, reply: Reply) {
            self.replies
                .borrow_mut()
                .entry((strategy, url.to_string()))
                .or_default()
                .push_back(reply);
        }

        fn calls_for(&self, strategy: FetchStrategy) -> usize {
            self.calls
                .borrow()
                .iter()
                .filter(|(s, _)| *s == strategy)
                .count()
        }
    }

    impl Transport for Scripted {
        fn get_text(&self, strategy: FetchStrategy, url: &Url) -> Result<String, TransportError> {
            self.calls.borrow_mut().push((strategy, url.to_string()));
            self.replies
                .borrow_mut()
                .get_mut(&(strategy, url.to_string()))
                .and_then(|q| q.pop_front())
                .unwrap_or_else(|| {
                    Err(TransportError::Timeout {
                        url: url.to_string(),
                    })
                })
        }
    }

    fn timeout(url: &Url) -> Reply {
        Err(TransportError::Timeout {
            url: url.to_string(),
        })
    }

    fn page(rows: &[i64], next: Option<&Url>) -> Reply {
        let value: Vec<_> = rows.iter().map(|id| json!({ "ID": id })).collect();
        let mut body = json!({ "value": value });
        if let Some(next) = next {
            body["odata.nextLink"] = json!(next.to_string());
        }
        Ok(body.to_string())
    }

    fn source() -> SourceConfig {
        SourceConfig {
            base_url: "https://data.example/odata".into(),
            fallback_base_url: "http://data.example/odata".into(),
            dataset_id: "TEST01".into(),
            entity_set: "TypedDataSet".into(),
            select_fields: None,
            user_agent: "test".into(),
        }
    }

    fn primary_url() -> Url {
        dataset_url(&source().base_url, &source(), None).unwrap()
    }

    fn fallback_url() -> Url {
        dataset_url(&source().fallback_base_url, &source(), None).unwrap()
    }

    fn ids(records: &[RawRecord]) -> Vec<i64> {
        records.iter().map(|r| r["ID"].as_i64().unwrap()).collect()
    }

    #[test]
    fn builds_select_query() {
        let fields = vec!["Periods".to_string(), "Value_1".to_string()];
        let url = dataset_url("https://data.example/odata/", &source(), Some(&fields)).unwrap();
        assert_eq!(url.path(), "/odata/TEST01/TypedDataSet");
        let pairs: HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(pairs["$format"], "json");
        assert_eq!(pairs["$select"], "Periods,Value_1");

        let url = dataset_url("https://data.example/odata", &source(), None).unwrap();
        assert!(!url.query_pairs().any(|(k, _)| k == "$select"));
    }

    #[test]
    fn follows_pagination_until_exhausted() {
        let first = primary_url();
        let second = Url::parse("https://data.example/odata/TEST01/TypedDataSet?$skiptoken=2").unwrap();
        let third = Url::parse("https://data.example/odata/TEST01/TypedDataSet?$skiptoken=4").unwrap();

        let transport = Scripted::default();
        transport.push(FetchStrategy::Primary, &first, page(&[1, 2], Some(&second)));
        transport.push(FetchStrategy::Primary, &second, page(&[3, 4], Some(&third)));
        transport.push(FetchStrategy::Primary, &third, page(&[5], None));

        let fetcher = Fetcher::with_transport(&transport, source(), RetryPolicy::immediate(3));
        let records = fetcher.fetch_all(None).unwrap();
        assert_eq!(ids(&records), vec![1, 2, 3, 4, 5]);
        assert_eq!(transport.calls_for(FetchStrategy::Fallback), 0);
    }

    #[test]
    fn accepts_v4_continuation_key() {
        let first = primary_url();
        let second = Url::parse("https://data.example/odata/TEST01/TypedDataSet?$skip=1").unwrap();
        let transport = Scripted::default();
        transport.push(
            FetchStrategy::Primary,
            &first,
            Ok(json!({ "value": [{ "ID": 1 }], "@odata.nextLink": second.to_string() }).to_string()),
        );
        transport.push(FetchStrategy::Primary, &second, page(&[2], None));

        let fetcher = Fetcher::with_transport(&transport, source(), RetryPolicy::immediate(1));
        assert_eq!(ids(&fetcher.fetch_all(None).unwrap()), vec![1, 2]);
    }

    #[test]
    fn transient_failures_below_budget_give_same_data() {
        let first = primary_url();
        let second = Url::parse("https://data.example/odata/TEST01/TypedDataSet?$skiptoken=2").unwrap();

        let clean = Scripted::default();
        clean.push(FetchStrategy::Primary, &first, page(&[1, 2], Some(&second)));
        clean.push(FetchStrategy::Primary, &second, page(&[3], None));
        let expected = Fetcher::with_transport(&clean, source(), RetryPolicy::immediate(3))
            .fetch_all(None)
            .unwrap();

        let flaky = Scripted::default();
        flaky.push(FetchStrategy::Primary, &first, timeout(&first));
        flaky.push(FetchStrategy::Primary, &first, timeout(&first));
        flaky.push(FetchStrategy::Primary, &first, page(&[1, 2], Some(&second)));
        flaky.push(
            FetchStrategy::Primary,
            &second,
            Err(TransportError::Status {
                url: second.to_string(),
                status: 503,
            }),
        );
        flaky.push(FetchStrategy::Primary, &second, page(&[3], None));
        let got = Fetcher::with_transport(&flaky, source(), RetryPolicy::immediate(3))
            .fetch_all(None)
            .unwrap();

        assert_eq!(got, expected);
        assert_eq!(flaky.calls_for(FetchStrategy::Primary), 5);
        assert_eq!(flaky.calls_for(FetchStrategy::Fallback), 0);
    }

    #[test]
    fn falls_back_once_and_restarts_from_first_page() {
        let first = primary_url();
        let second = Url::parse("https://data.example/odata/TEST01/TypedDataSet?$skiptoken=2").unwrap();
        let fb_first = fallback_url();
        // the server hands out https links; the fallback must stay on http
        let fb_second = Url::parse("http://data.example/odata/TEST01/TypedDataSet?$skiptoken=2").unwrap();

        let transport = Scripted::default();
        transport.push(FetchStrategy::Primary, &first, page(&[1, 2], Some(&second)));
        // second primary page never answers
        transport.push(FetchStrategy::Fallback, &fb_first, page(&[1, 2], Some(&second)));
        transport.push(FetchStrategy::Fallback, &fb_second, page(&[3], None));

        let fetcher = Fetcher::with_transport(&transport, source(), RetryPolicy::immediate(2));
        let records = fetcher.fetch_all(None).unwrap();
        assert_eq!(ids(&records), vec![1, 2, 3]);
        assert_eq!(transport.calls_for(FetchStrategy::Primary), 3);
        assert_eq!(transport.calls_for(FetchStrategy::Fallback), 2);
    }

    #[test]
    fn every_attempt_failing_is_a_fetch_error() {
        let transport = Scripted::default();
        let fetcher = Fetcher::with_transport(&transport, source(), RetryPolicy::immediate(3));

        let err = fetcher.fetch_all(None).unwrap_err();
        match err {
            FetchError::AllStrategiesFailed { primary, fallback } => {
                assert!(matches!(
                    *primary,
                    FetchError::RetriesExhausted { attempts: 3, source: TransportError::Timeout { .. }, .. }
                ));
                assert!(matches!(*fallback, FetchError::RetriesExhausted { attempts: 3, .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.calls_for(FetchStrategy::Primary), 3);
        assert_eq!(transport.calls_for(FetchStrategy::Fallback), 3);
    }

    #[test]
    fn client_errors_are_not_retried() {
        let first = primary_url();
        let fb_first = fallback_url();
        let transport = Scripted::default();
        let not_found = |u: &Url| {
            Err(TransportError::Status {
                url: u.to_string(),
                status: 404,
            })
        };
        transport.push(FetchStrategy::Primary, &first, not_found(&first));
        transport.push(FetchStrategy::Fallback, &fb_first, not_found(&fb_first));

        let fetcher = Fetcher::with_transport(&transport, source(), RetryPolicy::immediate(5));
        let err = fetcher.fetch_all(None).unwrap_err();
        match err {
            FetchError::AllStrategiesFailed { primary, .. } => {
                assert!(matches!(*primary, FetchError::Rejected { .. }))
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(transport.calls_for(FetchStrategy::Primary), 1);
    }

    #[test]
    fn malformed_body_carries_snippet() {
        let first = primary_url();
        let fb_first = fallback_url();
        let transport = Scripted::default();
        for _ in 0..2 {
            transport.push(FetchStrategy::Primary, &first, Ok("<html>Service Unavailable</html>".into()));
            transport.push(FetchStrategy::Fallback, &fb_first, Ok("{\"value\": [".into()));
        }

        let fetcher = Fetcher::with_transport(&transport, source(), RetryPolicy::immediate(2));
        match fetcher.fetch_all(None).unwrap_err() {
            FetchError::AllStrategiesFailed { primary, fallback } => {
                match *primary {
                    FetchError::MalformedPage { snippet, attempts, .. } => {
                        assert_eq!(attempts, 2);
                        assert!(snippet.starts_with("<html>Service"));
                    }
                    other => panic!("unexpected primary error: {other:?}"),
                }
                assert!(matches!(*fallback, FetchError::MalformedPage { .. }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn page_without_value_is_malformed() {
        let err = decode_page(r#"{"odata.metadata": "x"}"#).unwrap_err();
        assert!(matches!(err, PageError::Malformed { .. }));
        let long = "x".repeat(1000);
        match decode_page(&long).unwrap_err() {
            PageError::Malformed { snippet, .. } => assert_eq!(snippet.len(), SNIPPET_CHARS),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn detects_pagination_loop() {
        let first = primary_url();
        let fb_first = fallback_url();
        let transport = Scripted::default();
        transport.push(FetchStrategy::Primary, &first, page(&[1], Some(&first)));
        transport.push(FetchStrategy::Fallback, &fb_first, page(&[1], Some(&fb_first)));

        let fetcher = Fetcher::with_transport(&transport, source(), RetryPolicy::immediate(1));
        match fetcher.fetch_all(None).unwrap_err() {
            FetchError::AllStrategiesFailed { primary, .. } => {
                assert!(matches!(*primary, FetchError::PaginationLoop { .. }))
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn relative_continuation_links_resolve() {
        let current = primary_url();
        let next = next_url(&current, "TypedDataSet?$skiptoken=10", "https").unwrap();
        assert_eq!(
            next.as_str(),
            "https://data.example/odata/TEST01/TypedDataSet?$skiptoken=10"
        );
    }
}
