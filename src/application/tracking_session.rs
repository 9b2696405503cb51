// Tracking session - orchestrates resolution, batched fetching, merging and trails
use crate::application::aircraft_repository::AircraftRepository;
use crate::application::aircraft_store::PersistentAircraftStore;
use crate::application::batched_fetcher::{BatchedFetcher, DEFAULT_BATCH_SIZE, DEFAULT_BATCH_TIMEOUT};
use crate::application::field_merger::merge_batch_at;
use crate::application::request_coordinator::{RequestCoordinator, DEFAULT_CACHE_TTL};
use crate::application::trail_recorder::{
    TrailRecorder, DEFAULT_MAX_TRAIL_LENGTH, DEFAULT_PERSIST_MAX_AIRCRAFT,
};
use crate::domain::aircraft::{now_ms, AircraftMap, AircraftRecord};
use crate::domain::error::TrackerError;
use crate::domain::session::{
    AircraftUpdate, ExtendedAircraft, ModelStats, RefreshMode, RefreshStatus, SessionSnapshot,
    SessionStatus, TrackingSessionState,
};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_FULL_REFRESH_INTERVAL_MS: i64 = 60 * 60 * 1000;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub cache_ttl: Duration,
    /// Age of the last full refresh after which identifiers are re-resolved
    pub full_refresh_interval_ms: i64,
    pub persist_trails: bool,
    pub persist_trail_aircraft: usize,
    pub persist_trail_points: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_timeout: DEFAULT_BATCH_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            full_refresh_interval_ms: DEFAULT_FULL_REFRESH_INTERVAL_MS,
            persist_trails: false,
            persist_trail_aircraft: DEFAULT_PERSIST_MAX_AIRCRAFT,
            persist_trail_points: DEFAULT_MAX_TRAIL_LENGTH,
        }
    }
}

type UpdateListener = Arc<dyn Fn(&AircraftUpdate) + Send + Sync>;
type StatusListener = Arc<dyn Fn(&SessionStatus) + Send + Sync>;

struct Listeners<L> {
    next_id: u64,
    entries: Vec<(u64, L)>,
}

impl<L: Clone> Listeners<L> {
    fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    fn add(&mut self, listener: L) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    fn snapshot(&self) -> Vec<L> {
        self.entries.iter().map(|(_, l)| l.clone()).collect()
    }
}

type Registry<L> = Arc<Mutex<Listeners<L>>>;

/// Handle returned by the subscribe methods. The listener stays registered
/// until [`unsubscribe`](Subscription::unsubscribe) is called or the handle
/// is dropped.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new<L: Send + 'static>(registry: &Registry<L>, id: u64) -> Self {
        let registry: Weak<Mutex<Listeners<L>>> = Arc::downgrade(registry);
        Self {
            release: Some(Box::new(move || {
                if let Some(registry) = registry.upgrade() {
                    lock(&*registry).entries.retain(|(entry_id, _)| *entry_id != id);
                }
            })),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

struct SessionInner {
    state: TrackingSessionState,
    /// Merged records for tracked identifiers, including ones not seen this cycle
    aircraft: AircraftMap,
    /// Identifiers present in the most recent live fetch
    live: HashSet<String>,
    last_update: Option<AircraftUpdate>,
    suppress_camera_fit: bool,
    status: SessionStatus,
    /// Bumped on every start/stop so late results of an old session are dropped
    generation: u64,
    cancel: CancellationToken,
}

impl SessionInner {
    fn idle() -> Self {
        Self {
            state: TrackingSessionState::default(),
            aircraft: AircraftMap::new(),
            live: HashSet::new(),
            last_update: None,
            suppress_camera_fit: false,
            status: SessionStatus::Inactive,
            generation: 0,
            cancel: CancellationToken::new(),
        }
    }
}

/// The tracking engine for one manufacturer at a time.
///
/// Constructed once at startup and shared by reference. All refreshes are
/// explicit; there is no polling timer. Operations never return errors:
/// failures become a [`RefreshStatus::Failed`] plus a status notification.
pub struct TrackingSession {
    repository: Arc<dyn AircraftRepository>,
    store: PersistentAircraftStore,
    trails: TrailRecorder,
    coordinator: RequestCoordinator<Vec<AircraftRecord>>,
    fetcher: BatchedFetcher,
    settings: SessionSettings,
    inner: Mutex<SessionInner>,
    /// Held from the final generation check until listeners are notified,
    /// and by `stop` while it resets; updates are never published out of order
    publish: Mutex<()>,
    refreshing: AtomicBool,
    update_listeners: Registry<UpdateListener>,
    status_listeners: Registry<StatusListener>,
}

/// Clears the re-entrancy and camera flags when a position refresh ends
struct RefreshGuard<'a> {
    session: &'a TrackingSession,
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.session.inner().suppress_camera_fit = false;
        self.session.refreshing.store(false, Ordering::Release);
    }
}

impl TrackingSession {
    pub fn new(
        repository: Arc<dyn AircraftRepository>,
        store: PersistentAircraftStore,
        trails: TrailRecorder,
        settings: SessionSettings,
    ) -> Self {
        if settings.persist_trails {
            if let Some(persisted) = store.load_trails() {
                let restored = trails.restore(persisted);
                tracing::info!("Restored {} persisted trails", restored);
            }
        }

        Self {
            repository,
            store,
            trails,
            coordinator: RequestCoordinator::new(),
            fetcher: BatchedFetcher::new(settings.batch_size, settings.batch_timeout),
            settings,
            inner: Mutex::new(SessionInner::idle()),
            publish: Mutex::new(()),
            refreshing: AtomicBool::new(false),
            update_listeners: Arc::new(Mutex::new(Listeners::new())),
            status_listeners: Arc::new(Mutex::new(Listeners::new())),
        }
    }

    fn inner(&self) -> MutexGuard<'_, SessionInner> {
        lock(&self.inner)
    }

    /// Begin tracking a manufacturer and run the initial full fetch.
    ///
    /// A no-op when already tracking the same manufacturer. An empty
    /// manufacturer stops the session without fetching.
    pub async fn start(&self, manufacturer: &str) -> RefreshStatus {
        let manufacturer = manufacturer.trim();
        if manufacturer.is_empty() {
            tracing::warn!("Ignoring start with empty manufacturer");
            self.stop();
            return RefreshStatus::Inactive;
        }

        let was_active = {
            let inner = self.inner();
            if inner.state.is_tracking(manufacturer) {
                tracing::debug!("Already tracking {}", manufacturer);
                return RefreshStatus::Unchanged;
            }
            inner.state.active
        };
        if was_active {
            self.stop();
        }

        let (generation, cancel) = {
            let mut inner = self.inner();
            inner.generation += 1;
            inner.cancel = CancellationToken::new();
            inner.state = TrackingSessionState {
                active: true,
                manufacturer: Some(manufacturer.to_string()),
                last_full_refresh_time: None,
                tracked_identifiers: BTreeSet::new(),
            };
            inner.status = SessionStatus::Active(manufacturer.to_string());
            (inner.generation, inner.cancel.clone())
        };

        tracing::info!(
            "Started tracking {} (session {})",
            manufacturer,
            self.store.get_or_create_session_id()
        );
        self.notify_status(&SessionStatus::Active(manufacturer.to_string()));

        match self.resolve_and_fetch(manufacturer, generation, &cancel).await {
            Ok(status) => status,
            Err(e) => self.report_failure(e),
        }
    }

    /// End tracking: cancel outstanding fetches, clear state and publish an
    /// empty update.
    pub fn stop(&self) {
        let _publish = lock(&self.publish);
        let manufacturer = {
            let mut inner = self.inner();
            inner.cancel.cancel();
            let generation = inner.generation + 1;
            let manufacturer = inner.state.manufacturer.take();
            *inner = SessionInner::idle();
            inner.generation = generation;
            manufacturer
        };

        self.trails.clear();
        if let Some(manufacturer) = &manufacturer {
            tracing::info!("Stopped tracking {}", manufacturer);
        }

        self.notify_update(&AircraftUpdate {
            aircraft: Vec::new(),
            manufacturer: None,
            timestamp: now_ms(),
            suppress_camera_fit: false,
        });
        self.notify_status(&SessionStatus::Inactive);
    }

    /// Re-fetch positions for already tracked identifiers without
    /// re-resolving them. Overlapping calls return [`RefreshStatus::Skipped`].
    pub async fn refresh_positions_only(&self) -> RefreshStatus {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("Position refresh already running, skipping");
            return RefreshStatus::Skipped;
        }
        let _guard = RefreshGuard { session: self };

        let (manufacturer, identifiers, generation, cancel) = {
            let mut inner = self.inner();
            let Some(manufacturer) = inner.state.manufacturer.clone().filter(|_| inner.state.active) else {
                return RefreshStatus::Inactive;
            };
            inner.suppress_camera_fit = true;
            let identifiers: Vec<String> = inner.state.tracked_identifiers.iter().cloned().collect();
            (manufacturer, identifiers, inner.generation, inner.cancel.clone())
        };

        if identifiers.is_empty() {
            return RefreshStatus::Unchanged;
        }

        let key = format!("positions-{}", manufacturer);
        match self.fetch_live(&key, &manufacturer, identifiers, &cancel, false).await {
            Ok(fetched) => self.apply_fetch(generation, fetched, RefreshMode::PositionsOnly, None),
            Err(e) => self.report_failure(e),
        }
    }

    /// Refresh the session, re-fetching only live identifiers while the last
    /// full refresh is recent, otherwise re-resolving everything. A failed
    /// optimized refresh falls back to a full one once.
    pub async fn full_refresh(&self) -> RefreshStatus {
        let (manufacturer, generation, cancel, last_full, live) = {
            let inner = self.inner();
            let Some(manufacturer) = inner.state.manufacturer.clone().filter(|_| inner.state.active) else {
                return RefreshStatus::Inactive;
            };
            let mut live: Vec<String> = inner.live.iter().cloned().collect();
            live.sort();
            (
                manufacturer,
                inner.generation,
                inner.cancel.clone(),
                inner.state.last_full_refresh_time,
                live,
            )
        };

        let recent = last_full.is_some_and(|t| now_ms() - t < self.settings.full_refresh_interval_ms);
        if recent && !live.is_empty() {
            let key = format!("optimized-{}", manufacturer);
            match self.fetch_live(&key, &manufacturer, live, &cancel, false).await {
                Ok(fetched) if !fetched.is_empty() => {
                    return self.apply_fetch(generation, fetched, RefreshMode::Optimized, None);
                }
                Ok(_) => tracing::info!("Optimized refresh returned no aircraft, falling back to full refresh"),
                Err(TrackerError::Cancelled) => return RefreshStatus::Inactive,
                Err(e) => tracing::warn!("Optimized refresh failed ({}), falling back to full refresh", e),
            }
        }

        match self.resolve_and_fetch(&manufacturer, generation, &cancel).await {
            Ok(status) => status,
            Err(e) => self.report_failure(e),
        }
    }

    async fn resolve_and_fetch(
        &self,
        manufacturer: &str,
        generation: u64,
        cancel: &CancellationToken,
    ) -> Result<RefreshStatus, TrackerError> {
        let resolved = tokio::select! {
            _ = cancel.cancelled() => return Err(TrackerError::Cancelled),
            resolved = self.repository.resolve_identifiers(manufacturer) => resolved?,
        };

        let identifiers: BTreeSet<String> = resolved
            .iter()
            .filter_map(|icao| AircraftRecord::normalize_icao(icao))
            .collect();
        tracing::info!("Resolved {} identifiers for {}", identifiers.len(), manufacturer);

        let fetched = if identifiers.is_empty() {
            Vec::new()
        } else {
            let key = format!("live-{}", manufacturer);
            let ids: Vec<String> = identifiers.iter().cloned().collect();
            self.fetch_live(&key, manufacturer, ids, cancel, true).await?
        };

        Ok(self.apply_fetch(generation, fetched, RefreshMode::Full, Some(identifiers)))
    }

    /// Batched, single-flight live fetch. Full fetches also go through the
    /// short-TTL cache.
    async fn fetch_live(
        &self,
        key: &str,
        manufacturer: &str,
        identifiers: Vec<String>,
        cancel: &CancellationToken,
        use_cache: bool,
    ) -> Result<Vec<AircraftRecord>, TrackerError> {
        let mut retried = false;
        loop {
            let factory = {
                let repository = self.repository.clone();
                let fetcher = self.fetcher.clone();
                let manufacturer = manufacturer.to_string();
                let identifiers = identifiers.clone();
                let cancel = cancel.clone();
                let timeout_secs = self.settings.batch_timeout.as_secs();

                move || async move {
                    let outcome = fetcher
                        .fetch_in_batches(&identifiers, &cancel, |batch| {
                            let repository = repository.clone();
                            let manufacturer = manufacturer.clone();
                            async move { repository.fetch_live(&manufacturer, &batch).await }
                        })
                        .await;

                    if outcome.cancelled {
                        return Err(TrackerError::Cancelled);
                    }
                    if outcome.all_failed() {
                        return Err(if outcome.timed_out {
                            TrackerError::Timeout(timeout_secs)
                        } else {
                            TrackerError::AllBatchesFailed(outcome.total_batches)
                        });
                    }
                    Ok(outcome.results)
                }
            };

            let result = if use_cache {
                self.coordinator
                    .with_ttl_cache(key, self.settings.cache_ttl, factory)
                    .await
            } else {
                self.coordinator.dedupe(key, factory).await
            };

            // joined a fetch that belonged to a cancelled session
            if matches!(result, Err(TrackerError::Cancelled)) && !cancel.is_cancelled() && !retried {
                retried = true;
                continue;
            }
            return result;
        }
    }

    fn apply_fetch(
        &self,
        generation: u64,
        fetched: Vec<AircraftRecord>,
        mode: RefreshMode,
        identifiers: Option<BTreeSet<String>>,
    ) -> RefreshStatus {
        let now = now_ms();
        let incoming: AircraftMap = fetched
            .into_iter()
            .filter_map(|mut record| {
                record.icao = AircraftRecord::normalize_icao(&record.icao)?;
                Some((record.icao.clone(), record))
            })
            .collect();

        let mut cached = self.store.load_at(now);
        {
            let inner = self.inner();
            if inner.generation != generation {
                tracing::debug!("Discarding results for a superseded session");
                return RefreshStatus::Inactive;
            }
            for (icao, record) in &inner.aircraft {
                cached.insert(icao.clone(), record.clone());
            }
        }

        let merged = merge_batch_at(&cached, &incoming, now);
        self.store.save(&merged);

        let _publish = lock(&self.publish);
        let (update, tracked, live_records, aircraft_count, live_count) = {
            let mut inner = self.inner();
            if inner.generation != generation {
                tracing::debug!("Discarding results for a superseded session");
                return RefreshStatus::Inactive;
            }

            if let Some(identifiers) = identifiers {
                inner.state.tracked_identifiers = identifiers;
                inner.state.last_full_refresh_time = Some(now);
            }

            let tracked = inner.state.tracked_identifiers.clone();
            inner.aircraft = tracked
                .iter()
                .filter_map(|icao| merged.get(icao).map(|record| (icao.clone(), record.clone())))
                .collect();

            let live_records: Vec<AircraftRecord> = incoming
                .values()
                .filter(|record| tracked.contains(&record.icao))
                .cloned()
                .collect();
            let live_now: HashSet<String> = live_records.iter().map(|r| r.icao.clone()).collect();
            if mode == RefreshMode::Optimized {
                // aircraft that dropped out stay live until the next full refresh
                inner.live.extend(live_now);
            } else {
                inner.live = live_now;
            }

            let update = AircraftUpdate {
                aircraft: sorted_records(inner.aircraft.values()),
                manufacturer: inner.state.manufacturer.clone(),
                timestamp: now,
                suppress_camera_fit: inner.suppress_camera_fit,
            };
            inner.last_update = Some(update.clone());
            let aircraft_count = inner.aircraft.len();
            let live_count = inner.live.len();
            (update, tracked, live_records, aircraft_count, live_count)
        };

        self.trails.retain(&tracked);
        self.trails.record_positions(&live_records, now);
        if self.trails.trail_count() == 0 {
            self.trails.force_generate(&update.aircraft, now);
        }
        if self.settings.persist_trails {
            let snapshot = self.trails.snapshot(
                self.settings.persist_trail_aircraft,
                self.settings.persist_trail_points,
                now,
            );
            self.store.save_trails(&snapshot);
        }

        tracing::info!(
            "{:?} refresh: {} aircraft tracked, {} live",
            mode,
            aircraft_count,
            live_count
        );
        self.notify_update(&update);

        RefreshStatus::Updated {
            mode,
            aircraft: aircraft_count,
            live: live_count,
        }
    }

    fn report_failure(&self, err: TrackerError) -> RefreshStatus {
        if err == TrackerError::Cancelled {
            tracing::debug!("Refresh abandoned: session was stopped or replaced");
            return RefreshStatus::Inactive;
        }

        tracing::error!("Refresh failed: {}", err);
        let status = SessionStatus::Error(err.to_string());
        self.inner().status = status.clone();
        self.notify_status(&status);
        RefreshStatus::Failed(err.to_string())
    }

    /// Register an update listener. It is called right away with the latest
    /// update if one exists, then on every successful refresh.
    ///
    /// Listeners run while updates are being published and must not call
    /// back into the session.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&AircraftUpdate) + Send + Sync + 'static,
    {
        let listener: UpdateListener = Arc::new(listener);
        let _publish = lock(&self.publish);
        let current = self.inner().last_update.clone();
        if let Some(update) = &current {
            listener(update);
        }
        let id = lock(&*self.update_listeners).add(listener);
        Subscription::new(&self.update_listeners, id)
    }

    /// Register a listener for session status changes
    pub fn subscribe_to_status<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&SessionStatus) + Send + Sync + 'static,
    {
        let listener: StatusListener = Arc::new(listener);
        let id = lock(&*self.status_listeners).add(listener);
        Subscription::new(&self.status_listeners, id)
    }

    fn notify_update(&self, update: &AircraftUpdate) {
        let listeners = lock(&*self.update_listeners).snapshot();
        for listener in listeners {
            listener(update);
        }
    }

    fn notify_status(&self, status: &SessionStatus) {
        let listeners = lock(&*self.status_listeners).snapshot();
        for listener in listeners {
            listener(status);
        }
    }

    pub fn get_tracked_aircraft(&self) -> Vec<AircraftRecord> {
        sorted_records(self.inner().aircraft.values())
    }

    /// Tracked aircraft with trails and live flags, optionally limited to
    /// one model (case-insensitive)
    pub fn get_extended_aircraft(&self, model_filter: Option<&str>) -> Vec<ExtendedAircraft> {
        let (records, live) = {
            let inner = self.inner();
            (sorted_records(inner.aircraft.values()), inner.live.clone())
        };

        records
            .into_iter()
            .filter(|record| {
                model_filter.is_none_or(|model| record.model_label().eq_ignore_ascii_case(model.trim()))
            })
            .map(|record| ExtendedAircraft {
                trail: self.trails.get_trail(&record.icao),
                live: live.contains(&record.icao),
                record,
            })
            .collect()
    }

    /// Per-model counts, largest groups first
    pub fn get_model_stats(&self) -> Vec<ModelStats> {
        let inner = self.inner();
        let mut counts: BTreeMap<&str, (usize, usize)> = BTreeMap::new();
        for record in inner.aircraft.values() {
            let entry = counts.entry(record.model_label()).or_default();
            entry.0 += 1;
            if inner.live.contains(&record.icao) {
                entry.1 += 1;
            }
        }

        let mut stats: Vec<ModelStats> = counts
            .into_iter()
            .map(|(model, (total, live))| ModelStats {
                model: model.to_string(),
                total,
                live,
            })
            .collect();
        stats.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.model.cmp(&b.model)));
        stats
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let inner = self.inner();
        SessionSnapshot {
            state: inner.state.clone(),
            aircraft_count: inner.aircraft.len(),
            suppress_camera_fit: inner.suppress_camera_fit,
            status: inner.status.to_string(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        self.inner().status.clone()
    }

    pub fn trails(&self) -> &TrailRecorder {
        &self.trails
    }

    pub fn store(&self) -> &PersistentAircraftStore {
        &self.store
    }

    /// Drop cached fetch results so the next refresh goes upstream
    pub fn clear_cache(&self) {
        self.coordinator.clear_cache();
    }
}

fn sorted_records<'a>(records: impl Iterator<Item = &'a AircraftRecord>) -> Vec<AircraftRecord> {
    let mut records: Vec<AircraftRecord> = records.cloned().collect();
    records.sort_by(|a, b| a.icao.cmp(&b.icao));
    records
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
