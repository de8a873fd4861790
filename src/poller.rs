//! Polling controller that keeps a fetched list fresh.
//!
//! A [`FreshnessPoller`] owns one snapshot of a list resource. A countdown task
//! ticks once per second and issues an automatic fetch when the countdown
//! reaches zero; callers can also refresh on demand. At most one automatic or
//! manual fetch is outstanding at a time, and responses are applied only if
//! they belong to the most recently issued request.
//!
//! The poller must be started from within a tokio runtime.

use crate::constants::{COARSE_STEP_SECS, DEFAULT_POLL_INTERVAL_SECS, FINE_BELOW_SECS};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};

/// What caused a fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchTrigger {
    /// The countdown reached zero.
    Automatic,
    /// The user asked for a refresh; coalesced with an outstanding fetch.
    Manual,
    /// The user asked the backend to re-sync; supersedes any outstanding fetch.
    Forced,
}

/// The fetch collaborator for one list resource.
#[async_trait]
pub trait ItemSource: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;
    type Id: Eq + Hash + Clone + Send + Sync + 'static;

    async fn fetch(&self, trigger: FetchTrigger) -> Result<Vec<Self::Item>>;

    /// Stable identity of an item across fetches.
    fn id_of(&self, item: &Self::Item) -> Self::Id;

    /// False when the resource key (e.g. the selected account) is absent.
    fn is_bound(&self) -> bool {
        true
    }
}

/// An [`ItemSource`] built from closures.
pub struct FnSource<F, K, T, Id> {
    fetch: F,
    id_of: K,
    bound: bool,
    _marker: PhantomData<fn() -> (T, Id)>,
}

/// Adapt a fetch closure and an id closure into an [`ItemSource`].
pub fn from_fn<F, Fut, K, T, Id>(fetch: F, id_of: K) -> FnSource<F, K, T, Id>
where
    F: Fn(FetchTrigger) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
    K: Fn(&T) -> Id + Send + Sync + 'static,
{
    FnSource {
        fetch,
        id_of,
        bound: true,
        _marker: PhantomData,
    }
}

impl<F, K, T, Id> FnSource<F, K, T, Id> {
    /// Mark whether the resource key is present.
    pub fn bound(mut self, bound: bool) -> Self {
        self.bound = bound;
        self
    }
}

#[async_trait]
impl<F, Fut, K, T, Id> ItemSource for FnSource<F, K, T, Id>
where
    F: Fn(FetchTrigger) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<T>>> + Send + 'static,
    K: Fn(&T) -> Id + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    Id: Eq + Hash + Clone + Send + Sync + 'static,
{
    type Item = T;
    type Id = Id;

    async fn fetch(&self, trigger: FetchTrigger) -> Result<Vec<T>> {
        (self.fetch)(trigger).await
    }

    fn id_of(&self, item: &T) -> Id {
        (self.id_of)(item)
    }

    fn is_bound(&self) -> bool {
        self.bound
    }
}

/// How often the remaining-seconds value is published to subscribers.
///
/// Only affects status updates; fetches always fire on the interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownDisplay {
    EverySecond,
    /// Publish every `step` seconds, and every second below `fine_below`.
    Coarse { step: u64, fine_below: u64 },
}

impl Default for CountdownDisplay {
    fn default() -> Self {
        Self::Coarse {
            step: COARSE_STEP_SECS,
            fine_below: FINE_BELOW_SECS,
        }
    }
}

impl CountdownDisplay {
    pub fn should_publish(&self, remaining: u64) -> bool {
        match *self {
            Self::EverySecond => true,
            Self::Coarse { step, fine_below } => {
                remaining < fine_below || step == 0 || remaining % step == 0
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollerOptions {
    /// Seconds between automatic fetches; zero is treated as one.
    pub interval_secs: u64,
    pub display: CountdownDisplay,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            display: CountdownDisplay::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Idle,
    Waiting,
    Fetching,
}

/// Observable poller state for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStatus {
    pub phase: PollPhase,
    pub remaining_secs: u64,
    pub item_count: usize,
    pub last_fetched_at: Option<DateTime<Utc>>,
}

/// Result of a manual or forced refresh.
#[derive(Debug)]
pub enum RefreshOutcome {
    /// The snapshot was replaced; `new_items` were not in the previous one.
    Applied { new_items: usize },
    /// A fetch was already in flight, or the source is unbound.
    Skipped,
    /// The response arrived after a newer request or after `stop()`.
    Discarded,
    /// The fetch failed; the snapshot is unchanged.
    Failed(Error),
}

impl RefreshOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

const TICK: Duration = Duration::from_secs(1);

type NewItemsHandler<T> = Box<dyn Fn(&[T]) + Send + Sync>;
type ErrorHandler = Box<dyn Fn(&Error, FetchTrigger) + Send + Sync>;

struct PollState<T, Id> {
    items: Vec<T>,
    ids: HashSet<Id>,
    baseline: bool,
    last_fetched_at: Option<DateTime<Utc>>,
    remaining: u64,
    enabled: bool,
    in_flight: Option<u64>,
    issued_seq: u64,
    generation: u64,
}

impl<T, Id> PollState<T, Id> {
    fn begin_fetch(&mut self) -> u64 {
        self.issued_seq += 1;
        self.in_flight = Some(self.issued_seq);
        self.issued_seq
    }

    fn phase(&self) -> PollPhase {
        if self.in_flight.is_some() {
            PollPhase::Fetching
        } else if self.enabled {
            PollPhase::Waiting
        } else {
            PollPhase::Idle
        }
    }

    fn status(&self) -> PollStatus {
        PollStatus {
            phase: self.phase(),
            remaining_secs: self.remaining,
            item_count: self.items.len(),
            last_fetched_at: self.last_fetched_at,
        }
    }
}

enum Tick {
    Stopped,
    Busy,
    Counting(u64),
    Due { seq: u64, generation: u64 },
}

struct Shared<S: ItemSource> {
    source: S,
    interval: u64,
    display: CountdownDisplay,
    state: Mutex<PollState<S::Item, S::Id>>,
    status_tx: watch::Sender<PollStatus>,
    on_new_items: Option<NewItemsHandler<S::Item>>,
    on_error: Option<ErrorHandler>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<S: ItemSource> Shared<S> {
    fn publish(&self) {
        let status = lock(&self.state).status();
        self.status_tx.send_replace(status);
    }

    fn tick(&self, generation: u64) -> Tick {
        let mut st = lock(&self.state);
        if !st.enabled || st.generation != generation {
            return Tick::Stopped;
        }
        if st.in_flight.is_some() {
            return Tick::Busy;
        }
        st.remaining = st.remaining.saturating_sub(1);
        if st.remaining > 0 {
            return Tick::Counting(st.remaining);
        }
        let seq = st.begin_fetch();
        Tick::Due {
            seq,
            generation: st.generation,
        }
    }

    fn complete(
        &self,
        generation: u64,
        seq: u64,
        trigger: FetchTrigger,
        result: Result<Vec<S::Item>>,
    ) -> RefreshOutcome {
        let mut st = lock(&self.state);
        if st.generation != generation {
            tracing::debug!(seq, "discarding response from stopped poller");
            return RefreshOutcome::Discarded;
        }
        if st.in_flight == Some(seq) {
            st.in_flight = None;
            st.remaining = self.interval;
        }
        if seq != st.issued_seq {
            tracing::debug!(seq, latest = st.issued_seq, "discarding superseded response");
            return RefreshOutcome::Discarded;
        }

        let items = match result {
            Ok(items) => items,
            Err(err) => {
                drop(st);
                self.publish();
                tracing::warn!(?trigger, error = %err, "fetch failed");
                if let Some(handler) = &self.on_error {
                    handler(&err, trigger);
                }
                return RefreshOutcome::Failed(err);
            }
        };

        let fresh: Vec<S::Item> = items
            .iter()
            .filter(|item| !st.ids.contains(&self.source.id_of(item)))
            .cloned()
            .collect();
        let report = st.baseline && trigger == FetchTrigger::Automatic && !fresh.is_empty();

        st.ids = items.iter().map(|item| self.source.id_of(item)).collect();
        st.items = items;
        st.baseline = true;
        st.last_fetched_at = Some(Utc::now());
        tracing::debug!(?trigger, seq, count = st.items.len(), new = fresh.len(), "snapshot applied");
        drop(st);
        self.publish();

        if report {
            tracing::info!(count = fresh.len(), "new items observed");
            if let Some(handler) = &self.on_new_items {
                handler(&fresh);
            }
        }
        RefreshOutcome::Applied {
            new_items: fresh.len(),
        }
    }
}

fn spawn_fetch<S: ItemSource>(
    shared: &Arc<Shared<S>>,
    trigger: FetchTrigger,
    seq: u64,
    generation: u64,
) -> JoinHandle<RefreshOutcome> {
    let shared = Arc::clone(shared);
    tracing::debug!(?trigger, seq, "fetch issued");
    tokio::spawn(async move {
        let result = shared.source.fetch(trigger).await;
        shared.complete(generation, seq, trigger, result)
    })
}

async fn run_countdown<S: ItemSource>(shared: Arc<Shared<S>>, generation: u64, first: Instant) {
    let mut ticker = interval_at(first, TICK);
    loop {
        ticker.tick().await;
        match shared.tick(generation) {
            Tick::Stopped => break,
            Tick::Busy => tracing::trace!("fetch in flight, tick skipped"),
            Tick::Counting(remaining) => {
                tracing::trace!(remaining, "countdown");
                if shared.display.should_publish(remaining) {
                    shared.publish();
                }
            }
            Tick::Due { seq, generation } => {
                shared.publish();
                spawn_fetch(&shared, FetchTrigger::Automatic, seq, generation);
            }
        }
    }
}

/// Builder for [`FreshnessPoller`].
pub struct PollerBuilder<S: ItemSource> {
    source: S,
    options: PollerOptions,
    on_new_items: Option<NewItemsHandler<S::Item>>,
    on_error: Option<ErrorHandler>,
}

impl<S: ItemSource> PollerBuilder<S> {
    pub fn options(mut self, options: PollerOptions) -> Self {
        self.options = options;
        self
    }

    pub fn interval_secs(mut self, secs: u64) -> Self {
        self.options.interval_secs = secs;
        self
    }

    pub fn display(mut self, display: CountdownDisplay) -> Self {
        self.options.display = display;
        self
    }

    /// Called with the items that were not in the previous snapshot, after
    /// automatic fetches only.
    pub fn on_new_items<F>(mut self, handler: F) -> Self
    where
        F: Fn(&[S::Item]) + Send + Sync + 'static,
    {
        self.on_new_items = Some(Box::new(handler));
        self
    }

    /// Called for every failed fetch. Polling continues regardless.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error, FetchTrigger) + Send + Sync + 'static,
    {
        self.on_error = Some(Box::new(handler));
        self
    }

    pub fn build(self) -> FreshnessPoller<S> {
        let interval = self.options.interval_secs.max(1);
        let state = PollState {
            items: Vec::new(),
            ids: HashSet::new(),
            baseline: false,
            last_fetched_at: None,
            remaining: interval,
            enabled: false,
            in_flight: None,
            issued_seq: 0,
            generation: 0,
        };
        let (status_tx, _) = watch::channel(state.status());
        FreshnessPoller {
            shared: Arc::new(Shared {
                source: self.source,
                interval,
                display: self.options.display,
                state: Mutex::new(state),
                status_tx,
                on_new_items: self.on_new_items,
                on_error: self.on_error,
            }),
            ticker: Mutex::new(None),
        }
    }
}

/// Keeps one list resource fresh. Dropping the poller stops it.
pub struct FreshnessPoller<S: ItemSource> {
    shared: Arc<Shared<S>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

impl<S: ItemSource> FreshnessPoller<S> {
    pub fn builder(source: S) -> PollerBuilder<S> {
        PollerBuilder {
            source,
            options: PollerOptions::default(),
            on_new_items: None,
            on_error: None,
        }
    }

    pub fn new(source: S, options: PollerOptions) -> Self {
        Self::builder(source).options(options).build()
    }

    /// Start the countdown. Returns `false` if already running or if the
    /// source is unbound.
    pub fn start(&self) -> bool {
        if !self.shared.source.is_bound() {
            tracing::debug!("no resource bound, poller not started");
            return false;
        }
        let mut ticker = lock(&self.ticker);
        let generation = {
            let mut st = lock(&self.shared.state);
            if st.enabled {
                return false;
            }
            st.enabled = true;
            st.remaining = self.shared.interval;
            st.generation
        };
        self.shared.publish();
        // The first tick is anchored here, not when the task is first polled.
        let first = Instant::now() + TICK;
        *ticker = Some(tokio::spawn(run_countdown(
            Arc::clone(&self.shared),
            generation,
            first,
        )));
        tracing::info!(interval_secs = self.shared.interval, "poller started");
        true
    }

    /// Stop the countdown. Outstanding responses are discarded on arrival.
    /// Safe to call any number of times.
    pub fn stop(&self) {
        if let Some(handle) = lock(&self.ticker).take() {
            handle.abort();
        }
        let was_running = {
            let mut st = lock(&self.shared.state);
            let was_running = st.enabled;
            st.enabled = false;
            st.generation += 1;
            st.in_flight = None;
            st.remaining = self.shared.interval;
            was_running
        };
        self.shared.publish();
        if was_running {
            tracing::info!("poller stopped");
        }
    }

    /// Fetch now unless a fetch is already in flight.
    pub async fn refresh_now(&self) -> RefreshOutcome {
        self.refresh(FetchTrigger::Manual).await
    }

    /// Fetch now, superseding any outstanding fetch.
    pub async fn force_refresh(&self) -> RefreshOutcome {
        self.refresh(FetchTrigger::Forced).await
    }

    async fn refresh(&self, trigger: FetchTrigger) -> RefreshOutcome {
        if !self.shared.source.is_bound() {
            return RefreshOutcome::Skipped;
        }
        let (seq, generation) = {
            let mut st = lock(&self.shared.state);
            if trigger != FetchTrigger::Forced && st.in_flight.is_some() {
                tracing::debug!(?trigger, "fetch already in flight, refresh coalesced");
                return RefreshOutcome::Skipped;
            }
            (st.begin_fetch(), st.generation)
        };
        self.shared.publish();
        match spawn_fetch(&self.shared, trigger, seq, generation).await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "fetch task did not complete");
                RefreshOutcome::Discarded
            }
        }
    }

    /// Replace the baseline snapshot without reporting new items.
    pub fn seed(&self, items: Vec<S::Item>) {
        {
            let mut st = lock(&self.shared.state);
            st.ids = items.iter().map(|item| self.shared.source.id_of(item)).collect();
            st.items = items;
            st.baseline = true;
        }
        self.shared.publish();
    }

    pub fn items(&self) -> Vec<S::Item> {
        lock(&self.shared.state).items.clone()
    }

    pub fn status(&self) -> PollStatus {
        lock(&self.shared.state).status()
    }

    pub fn subscribe(&self) -> watch::Receiver<PollStatus> {
        self.shared.status_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        lock(&self.shared.state).enabled
    }

    pub fn is_in_flight(&self) -> bool {
        lock(&self.shared.state).in_flight.is_some()
    }

    pub fn interval_secs(&self) -> u64 {
        self.shared.interval
    }

    pub fn source(&self) -> &S {
        &self.shared.source
    }
}

impl<S: ItemSource> Drop for FreshnessPoller<S> {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    type Rows = Vec<&'static str>;

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn tick_secs(n: u64) {
        for _ in 0..n {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }
    }

    /// Source answering from a script; repeats the last answer when exhausted.
    fn scripted(
        script: Vec<Result<Rows>>,
    ) -> (
        impl ItemSource<Item = &'static str, Id = &'static str>,
        Arc<AtomicUsize>,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let script = Arc::new(Mutex::new(VecDeque::from(script)));
        let counter = Arc::clone(&calls);
        let source = from_fn(
            move |_trigger| {
                counter.fetch_add(1, Ordering::SeqCst);
                let mut script = script.lock().unwrap();
                let next = if script.len() > 1 {
                    script.pop_front().unwrap()
                } else {
                    match script.front() {
                        Some(Ok(rows)) => Ok(rows.clone()),
                        Some(Err(err)) => Err(Error::Fetch(err.to_string())),
                        None => Ok(Vec::new()),
                    }
                };
                async move { next }
            },
            |row: &&'static str| *row,
        );
        (source, calls)
    }

    /// Source whose fetches stay pending until the test resolves them.
    #[derive(Clone, Default)]
    struct Gate {
        pending: Arc<Mutex<Vec<Option<oneshot::Sender<Result<Rows>>>>>>,
    }

    impl Gate {
        fn calls(&self) -> usize {
            self.pending.lock().unwrap().len()
        }

        fn resolve(&self, index: usize, result: Result<Rows>) {
            let tx = self.pending.lock().unwrap()[index].take().unwrap();
            let _ = tx.send(result);
        }
    }

    struct GatedSource(Gate);

    #[async_trait]
    impl ItemSource for GatedSource {
        type Item = &'static str;
        type Id = &'static str;

        async fn fetch(&self, _trigger: FetchTrigger) -> Result<Rows> {
            let (tx, rx) = oneshot::channel();
            self.0.pending.lock().unwrap().push(Some(tx));
            rx.await
                .unwrap_or_else(|_| Err(Error::Fetch("gate dropped".into())))
        }

        fn id_of(&self, item: &&'static str) -> &'static str {
            *item
        }
    }

    fn gated(interval: u64) -> (Arc<FreshnessPoller<GatedSource>>, Gate) {
        let gate = Gate::default();
        let poller = FreshnessPoller::builder(GatedSource(gate.clone()))
            .interval_secs(interval)
            .build();
        (Arc::new(poller), gate)
    }

    fn collect_new<S>(builder: PollerBuilder<S>) -> (FreshnessPoller<S>, Arc<Mutex<Vec<Rows>>>)
    where
        S: ItemSource<Item = &'static str, Id = &'static str>,
    {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let poller = builder
            .on_new_items(move |rows: &[&'static str]| sink.lock().unwrap().push(rows.to_vec()))
            .build();
        (poller, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_fetch_per_interval() {
        let (source, calls) = scripted(vec![Ok(vec!["a"])]);
        let poller = FreshnessPoller::builder(source).interval_secs(5).build();
        assert!(poller.start());

        tick_secs(4).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        tick_secs(1).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tick_secs(5).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        tick_secs(15).await;
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert_eq!(poller.items(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_fetches() {
        let (source, calls) = scripted(vec![Ok(vec!["a"])]);
        let poller = FreshnessPoller::builder(source).interval_secs(5).build();
        poller.start();
        tick_secs(5).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        poller.stop();
        tick_secs(20).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!poller.is_running());
        assert_eq!(poller.status().phase, PollPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_is_idempotent() {
        let (source, _) = scripted(vec![Ok(vec![])]);
        let poller = FreshnessPoller::builder(source).interval_secs(5).build();
        poller.stop();
        poller.start();
        poller.stop();
        poller.stop();
        assert!(!poller.is_running());
        assert!(poller.start());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_requires_bound_resource() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let source = from_fn(
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(vec!["a"]) }
            },
            |row: &&'static str| *row,
        )
        .bound(false);
        let poller = FreshnessPoller::builder(source).interval_secs(2).build();
        assert!(!poller.start());
        assert!(matches!(poller.refresh_now().await, RefreshOutcome::Skipped));
        tick_secs(10).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_noop() {
        let (source, calls) = scripted(vec![Ok(vec!["a"])]);
        let poller = FreshnessPoller::builder(source).interval_secs(3).build();
        assert!(poller.start());
        assert!(!poller.start());
        tick_secs(3).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_now_coalesces_while_in_flight() {
        let (poller, gate) = gated(30);
        let first = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.refresh_now().await })
        };
        settle().await;
        assert_eq!(gate.calls(), 1);
        assert!(poller.is_in_flight());

        assert!(matches!(poller.refresh_now().await, RefreshOutcome::Skipped));
        assert_eq!(gate.calls(), 1);

        gate.resolve(0, Ok(vec!["a"]));
        assert!(first.await.unwrap().is_applied());
        assert!(!poller.is_in_flight());
        assert_eq!(poller.items(), vec!["a"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latest_issued_response_wins() {
        let (poller, gate) = gated(30);
        let first = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.force_refresh().await })
        };
        settle().await;
        let second = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.force_refresh().await })
        };
        settle().await;
        assert_eq!(gate.calls(), 2);

        gate.resolve(1, Ok(vec!["second"]));
        assert!(second.await.unwrap().is_applied());
        gate.resolve(0, Ok(vec!["first"]));
        assert!(matches!(first.await.unwrap(), RefreshOutcome::Discarded));

        assert_eq!(poller.items(), vec!["second"]);
        assert!(!poller.is_in_flight());
    }

    #[tokio::test(start_paused = true)]
    async fn test_superseded_response_does_not_clear_busy_flag() {
        let (poller, gate) = gated(30);
        let manual = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.refresh_now().await })
        };
        settle().await;
        let forced = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.force_refresh().await })
        };
        settle().await;

        gate.resolve(0, Ok(vec!["stale"]));
        assert!(matches!(manual.await.unwrap(), RefreshOutcome::Discarded));
        assert!(poller.is_in_flight());

        gate.resolve(1, Ok(vec!["fresh"]));
        assert!(forced.await.unwrap().is_applied());
        assert_eq!(poller.items(), vec!["fresh"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_items_reported_exactly() {
        let (source, _) = scripted(vec![Ok(vec!["a", "b", "c"])]);
        let (poller, seen) = collect_new(FreshnessPoller::builder(source).interval_secs(5));
        poller.seed(vec!["a", "b"]);
        poller.start();
        tick_secs(5).await;
        assert_eq!(*seen.lock().unwrap(), vec![vec!["c"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_snapshot_not_reported() {
        let (source, calls) = scripted(vec![Ok(vec!["a", "b"])]);
        let (poller, seen) = collect_new(FreshnessPoller::builder(source).interval_secs(5));
        poller.seed(vec!["a", "b"]);
        poller.start();
        tick_secs(10).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_refresh_does_not_report() {
        let (source, _) = scripted(vec![Ok(vec!["a", "b"])]);
        let (poller, seen) = collect_new(FreshnessPoller::builder(source).interval_secs(5));
        poller.seed(vec!["a"]);
        match poller.refresh_now().await {
            RefreshOutcome::Applied { new_items } => assert_eq!(new_items, 1),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_establishes_baseline() {
        let (source, _) = scripted(vec![Ok(vec!["a"]), Ok(vec!["b", "a"])]);
        let (poller, seen) = collect_new(FreshnessPoller::builder(source).interval_secs(5));
        poller.start();
        tick_secs(5).await;
        assert!(seen.lock().unwrap().is_empty());
        tick_secs(5).await;
        assert_eq!(*seen.lock().unwrap(), vec![vec!["b"]]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_fetch_keeps_snapshot_and_schedule() {
        let (source, calls) = scripted(vec![
            Ok(vec!["a"]),
            Err(Error::Network("connection reset".into())),
            Ok(vec!["a", "b"]),
        ]);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&errors);
        let poller = FreshnessPoller::builder(source)
            .interval_secs(5)
            .on_error(move |err, trigger| sink.lock().unwrap().push((err.to_string(), trigger)))
            .build();

        assert!(poller.refresh_now().await.is_applied());
        poller.start();
        tick_secs(5).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(poller.items(), vec!["a"]);
        assert_eq!(errors.lock().unwrap().len(), 1);
        assert_eq!(errors.lock().unwrap()[0].1, FetchTrigger::Automatic);
        assert!(poller.is_running());
        assert_eq!(poller.status().remaining_secs, 5);

        tick_secs(5).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(poller.items(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_manual_failure_is_returned() {
        let (source, _) = scripted(vec![Err(Error::Fetch("boom".into()))]);
        let poller = FreshnessPoller::builder(source).interval_secs(5).build();
        match poller.refresh_now().await {
            RefreshOutcome::Failed(err) => assert!(err.to_string().contains("boom")),
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(poller.items().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_discards_in_flight_response() {
        let (poller, gate) = gated(30);
        let pending = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.refresh_now().await })
        };
        settle().await;
        poller.start();
        poller.stop();
        assert!(!poller.is_in_flight());

        gate.resolve(0, Ok(vec!["late"]));
        assert!(matches!(pending.await.unwrap(), RefreshOutcome::Discarded));
        assert!(poller.items().is_empty());
        assert!(poller.start());
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_paused_while_fetching() {
        let (poller, gate) = gated(2);
        poller.start();
        tick_secs(2).await;
        assert_eq!(gate.calls(), 1);
        assert_eq!(poller.status().phase, PollPhase::Fetching);

        tick_secs(10).await;
        assert_eq!(gate.calls(), 1);

        gate.resolve(0, Ok(vec!["a"]));
        settle().await;
        assert_eq!(poller.status().phase, PollPhase::Waiting);
        assert_eq!(poller.status().remaining_secs, 2);
        tick_secs(2).await;
        assert_eq!(gate.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_subscription() {
        let (source, _) = scripted(vec![Ok(vec!["a", "b"])]);
        let poller = FreshnessPoller::builder(source)
            .interval_secs(20)
            .display(CountdownDisplay::EverySecond)
            .build();
        let rx = poller.subscribe();
        assert_eq!(rx.borrow().phase, PollPhase::Idle);

        poller.start();
        assert_eq!(rx.borrow().phase, PollPhase::Waiting);
        assert_eq!(rx.borrow().remaining_secs, 20);

        tick_secs(3).await;
        assert_eq!(rx.borrow().remaining_secs, 17);

        tick_secs(17).await;
        let status = rx.borrow().clone();
        assert_eq!(status.item_count, 2);
        assert!(status.last_fetched_at.is_some());

        poller.stop();
        assert_eq!(rx.borrow().phase, PollPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_coarse_display_keeps_fetch_cadence() {
        let (source, calls) = scripted(vec![Ok(vec!["a"])]);
        let poller = FreshnessPoller::builder(source)
            .interval_secs(7)
            .display(CountdownDisplay::default())
            .build();
        let rx = poller.subscribe();
        poller.start();

        tick_secs(1).await;
        // 6 remaining is below the fine threshold, so it is published.
        assert_eq!(rx.borrow().remaining_secs, 6);
        tick_secs(6).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        tick_secs(14).await;
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_coarse_display_policy() {
        let display = CountdownDisplay::Coarse {
            step: 5,
            fine_below: 10,
        };
        let published: Vec<u64> = (1..30).filter(|r| display.should_publish(*r)).collect();
        assert_eq!(published, vec![1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 15, 20, 25]);
        assert!((1..30).all(|r| CountdownDisplay::EverySecond.should_publish(r)));
    }

    #[test]
    fn test_zero_interval_clamped() {
        let (source, _) = scripted(vec![Ok(vec![])]);
        let poller = FreshnessPoller::builder(source).interval_secs(0).build();
        assert_eq!(poller.interval_secs(), 1);
    }
}
