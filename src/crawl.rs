//! Crawl driver.
//!
//! Starting from seed addresses, every address is claimed at most once through
//! a shared [`Dictionary`], fetched from a [`PageSource`] on a worker pool, and
//! searched with a regular expression. Matches are handed to a single-threaded
//! printer pool; the outbound links of a page are only followed when the page
//! matched.

use crate::dict::Dictionary;
use crate::pool::{PoolConfig, PoolError, ThreadPool};
use parking_lot::{Condvar, Mutex};
use regex::Regex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("no page at {0}")]
    NotFound(String),
    #[error("failed to fetch {address}: {reason}")]
    Fetch { address: String, reason: String },
    #[error("invalid search pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// A fetched page: its text and the addresses it links to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Page {
    pub text: String,
    pub hrefs: Vec<String>,
}

/// Where pages come from.
pub trait PageSource: Send + Sync + 'static {
    fn fetch(&self, address: &str) -> Result<Page, CrawlError>;
}

/// Pattern matches found on one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub address: String,
    pub matches: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlConfig {
    /// Worker threads fetching pages.
    pub threads: usize,
    /// Regular expression searched in every page.
    pub pattern: String,
}

impl CrawlConfig {
    pub fn new(pattern: impl Into<String>) -> Self {
        Self {
            threads: PoolConfig::default().threads,
            pattern: pattern.into(),
        }
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }
}

/// Outcome of [`Crawler::run`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlReport {
    /// Distinct addresses claimed, fetched or not.
    pub visited: usize,
    /// Addresses whose fetch failed.
    pub failures: usize,
    /// Pages with at least one match, sorted by address.
    pub matches: Vec<Match>,
}

type MatchSink = Arc<dyn Fn(&Match) + Send + Sync>;

pub struct Crawler<S> {
    source: Arc<S>,
    config: CrawlConfig,
    on_match: MatchSink,
}

impl<S: PageSource> Crawler<S> {
    pub fn new(source: S, config: CrawlConfig) -> Self {
        Self {
            source: Arc::new(source),
            config,
            on_match: Arc::new(|_: &Match| {}),
        }
    }

    /// Called from the printer thread for every matching page, one at a time.
    pub fn on_match<F>(mut self, f: F) -> Self
    where
        F: Fn(&Match) + Send + Sync + 'static,
    {
        self.on_match = Arc::new(f);
        self
    }

    /// Crawl from `seeds` until no fetch or print task is outstanding.
    pub fn run<I>(&self, seeds: I) -> Result<CrawlReport, CrawlError>
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        let pattern = Regex::new(&self.config.pattern)?;
        let crawl_pool = Arc::new(ThreadPool::new(
            PoolConfig::new()
                .threads(self.config.threads)
                .name("petek-crawl"),
        )?);
        let printer = Arc::new(ThreadPool::new(
            PoolConfig::new().threads(1).name("petek-printer"),
        )?);

        let ctx = Arc::new(Context {
            explored: Dictionary::new(),
            source: Arc::clone(&self.source),
            pattern,
            on_match: Arc::clone(&self.on_match),
            visited: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            found: Mutex::new(Vec::new()),
            pending: Pending::default(),
        });
        let pools = Pools {
            crawl: Arc::downgrade(&crawl_pool),
            printer: Arc::downgrade(&printer),
        };

        for seed in seeds {
            explore(&ctx, &crawl_pool, &pools, seed.into());
        }
        ctx.pending.wait_idle();

        // Every task has finished; these are the last strong references.
        drop(crawl_pool);
        drop(printer);

        let mut matches = std::mem::take(&mut *ctx.found.lock());
        matches.sort_by(|a, b| a.address.cmp(&b.address));
        let report = CrawlReport {
            visited: ctx.visited.load(Ordering::Relaxed),
            failures: ctx.failures.load(Ordering::Relaxed),
            matches,
        };
        debug!(
            visited = report.visited,
            failures = report.failures,
            matched = report.matches.len(),
            "crawl finished"
        );
        Ok(report)
    }
}

struct Context<S> {
    explored: Dictionary,
    source: Arc<S>,
    pattern: Regex,
    on_match: MatchSink,
    visited: AtomicUsize,
    failures: AtomicUsize,
    found: Mutex<Vec<Match>>,
    pending: Pending,
}

/// Tasks only hold weak references to the pools, so a pool is never dropped
/// from one of its own workers.
#[derive(Clone)]
struct Pools {
    crawl: Weak<ThreadPool>,
    printer: Weak<ThreadPool>,
}

/// Count of submitted tasks that have not finished yet.
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn start(&self) {
        *self.count.lock() += 1;
    }

    fn finish(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }

    fn wait_idle(&self) {
        let mut count = self.count.lock();
        while *count > 0 {
            self.idle.wait(&mut count);
        }
    }
}

/// Finishes one pending task when dropped, whether the task returned,
/// panicked or never ran.
struct TaskGuard<S: PageSource>(Arc<Context<S>>);

impl<S: PageSource> TaskGuard<S> {
    fn start(ctx: &Arc<Context<S>>) -> Self {
        ctx.pending.start();
        TaskGuard(Arc::clone(ctx))
    }
}

impl<S: PageSource> Drop for TaskGuard<S> {
    fn drop(&mut self) {
        self.0.pending.finish();
    }
}

fn explore<S: PageSource>(
    ctx: &Arc<Context<S>>,
    crawl_pool: &ThreadPool,
    pools: &Pools,
    address: String,
) {
    let task = TaskGuard::start(ctx);
    let task_pools = pools.clone();
    // The handle is not needed: completion is tracked by `pending`.
    let _ = crawl_pool.submit_priority(move || {
        if let Some(crawl_pool) = task_pools.crawl.upgrade() {
            visit(&task.0, &crawl_pool, &task_pools, address);
        }
    });
}

fn visit<S: PageSource>(
    ctx: &Arc<Context<S>>,
    crawl_pool: &ThreadPool,
    pools: &Pools,
    address: String,
) {
    if !ctx.explored.add(&address) {
        return;
    }
    ctx.visited.fetch_add(1, Ordering::Relaxed);

    let page = match ctx.source.fetch(&address) {
        Ok(page) => page,
        Err(e) => {
            warn!(%address, error = %e, "fetch failed");
            ctx.failures.fetch_add(1, Ordering::Relaxed);
            return;
        }
    };

    let matches: Vec<String> = ctx
        .pattern
        .find_iter(&page.text)
        .map(|m| m.as_str().to_owned())
        .collect();
    if matches.is_empty() {
        return;
    }

    if let Some(printer) = pools.printer.upgrade() {
        let task = TaskGuard::start(ctx);
        let found = Match {
            address: address.clone(),
            matches,
        };
        let _ = printer.submit_priority(move || {
            (task.0.on_match)(&found);
            task.0.found.lock().push(found);
        });
    }

    for href in page.hrefs {
        explore(ctx, crawl_pool, pools, href);
    }
}

/// In-memory [`PageSource`].
#[derive(Debug, Clone, Default)]
pub struct StaticWeb {
    pages: HashMap<String, Page>,
}

impl StaticWeb {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) the page at `address`.
    pub fn page<I>(
        mut self,
        address: impl Into<String>,
        text: impl Into<String>,
        hrefs: I,
    ) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.insert(address, text, hrefs);
        self
    }

    pub fn insert<I>(&mut self, address: impl Into<String>, text: impl Into<String>, hrefs: I)
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        self.pages.insert(
            address.into(),
            Page {
                text: text.into(),
                hrefs: hrefs.into_iter().map(Into::into).collect(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl PageSource for StaticWeb {
    fn fetch(&self, address: &str) -> Result<Page, CrawlError> {
        self.pages
            .get(address)
            .cloned()
            .ok_or_else(|| CrawlError::NotFound(address.to_owned()))
    }
}
