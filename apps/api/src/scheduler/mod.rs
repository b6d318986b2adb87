//! Scan Scheduler: one recurring trigger per active Gmail integration.
//!
//! Each registered [`ScanSchedule`] gets its own timer task while the scheduler
//! is running. When a timer fires, the scan itself runs on a separate detached
//! task, so stopping the scheduler (or replacing the trigger) never cancels a
//! scan that is already in flight.
//!
//! Lifecycle per integration:
//! unscheduled → `register` → scheduled → (fire) → scanning → scheduled …
//! and `remove` / `rebuild_all` without it → unscheduled.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub mod clock;
pub mod trigger;

pub use clock::{Clock, SystemClock};
pub use trigger::{ScanSchedule, ScanTime, ScheduleKind, ScheduleRecord};

use crate::scan::ScanWorkflow;

/// Supplies the currently active integrations' schedule fields.
#[async_trait]
pub trait ScheduleSource: Send + Sync {
    async fn active_schedules(&self) -> anyhow::Result<Vec<ScheduleRecord>>;
}

struct Trigger {
    schedule: ScanSchedule,
    timer: Option<JoinHandle<()>>,
}

#[derive(Default)]
struct TriggerTable {
    running: bool,
    triggers: HashMap<Uuid, Trigger>,
}

struct Inner {
    source: Arc<dyn ScheduleSource>,
    workflow: Arc<dyn ScanWorkflow>,
    clock: Arc<dyn Clock>,
    table: Mutex<TriggerTable>,
    in_flight: Mutex<HashSet<Uuid>>,
    rebuild_lock: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct ScanScheduler {
    inner: Arc<Inner>,
}

impl ScanScheduler {
    pub fn new(
        source: Arc<dyn ScheduleSource>,
        workflow: Arc<dyn ScanWorkflow>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                workflow,
                clock,
                table: Mutex::new(TriggerTable::default()),
                in_flight: Mutex::new(HashSet::new()),
                rebuild_lock: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Starts timers for every registered trigger. No-op when already running.
    pub fn start(&self) {
        let mut table = self.inner.table();
        if table.running {
            debug!("Scan scheduler already running");
            return;
        }
        table.running = true;
        for trigger in table.triggers.values_mut() {
            trigger.timer = Some(self.inner.spawn_timer(trigger.schedule.clone()));
        }
        info!(
            "Scan scheduler started with {} trigger(s)",
            table.triggers.len()
        );
    }

    /// Cancels pending timers. In-flight scans run to completion.
    /// Registered schedules are kept for a later `start`. No-op when stopped.
    pub fn stop(&self) {
        let mut table = self.inner.table();
        if !table.running {
            debug!("Scan scheduler already stopped");
            return;
        }
        table.running = false;
        for trigger in table.triggers.values_mut() {
            if let Some(timer) = trigger.timer.take() {
                timer.abort();
            }
        }
        info!("Scan scheduler stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.table().running
    }

    /// Registers (or replaces) the trigger keyed by the schedule's integration id.
    pub fn register(&self, schedule: ScanSchedule) {
        let mut table = self.inner.table();
        if let Some(previous) = table.triggers.remove(&schedule.integration_id) {
            if let Some(timer) = previous.timer {
                timer.abort();
            }
        }
        let timer = table
            .running
            .then(|| self.inner.spawn_timer(schedule.clone()));
        info!(
            "Scheduled {} scan for {} ({})",
            schedule.kind.label(),
            schedule.email,
            schedule.integration_id
        );
        table
            .triggers
            .insert(schedule.integration_id, Trigger { schedule, timer });
    }

    /// Unregisters an integration's trigger. Returns whether one existed.
    pub fn remove(&self, integration_id: Uuid) -> bool {
        let removed = self.inner.table().triggers.remove(&integration_id);
        match removed {
            Some(trigger) => {
                if let Some(timer) = trigger.timer {
                    timer.abort();
                }
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        let mut table = self.inner.table();
        for (_, trigger) in table.triggers.drain() {
            if let Some(timer) = trigger.timer {
                timer.abort();
            }
        }
    }

    /// Replaces every trigger with one per currently active integration.
    ///
    /// Records with a malformed schedule are logged and skipped; the others are
    /// still registered. Returns the number of triggers registered. When the
    /// active set cannot be fetched the current triggers are left in place.
    pub async fn rebuild_all(&self) -> anyhow::Result<usize> {
        let _guard = self.inner.rebuild_lock.lock().await;

        let records = self.inner.source.active_schedules().await?;
        self.clear();
        info!("Setting up {} scheduled scan(s)", records.len());

        let mut registered = 0;
        for record in &records {
            match ScanSchedule::try_from(record) {
                Ok(schedule) => {
                    self.register(schedule);
                    registered += 1;
                }
                Err(e) => warn!(
                    "Skipping scheduled scan for {} ({}): {e}",
                    record.email, record.integration_id
                ),
            }
        }
        Ok(registered)
    }

    /// Rebuilds after an integration's configuration changed.
    pub async fn refresh(&self) -> anyhow::Result<usize> {
        let registered = self.rebuild_all().await?;
        info!("Scan scheduler refreshed ({registered} trigger(s))");
        Ok(registered)
    }

    /// Starts a scan right away on a detached task. Returns `false` when a scan
    /// for this integration is already in flight.
    pub fn trigger_now(&self, integration_id: Uuid, job_ids: Option<Vec<Uuid>>) -> bool {
        self.inner.fire(integration_id, job_ids)
    }

    pub fn registered(&self) -> Vec<Uuid> {
        self.inner.table().triggers.keys().copied().collect()
    }

    pub fn next_fire(&self, integration_id: Uuid) -> Option<DateTime<Utc>> {
        let now = self.inner.clock.now();
        self.inner
            .table()
            .triggers
            .get(&integration_id)
            .map(|t| t.schedule.kind.next_fire_after(now))
    }
}

impl Inner {
    fn table(&self) -> MutexGuard<'_, TriggerTable> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn_timer(self: &Arc<Self>, schedule: ScanSchedule) -> JoinHandle<()> {
        let inner = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let now = inner.clock.now();
                let next = schedule.kind.next_fire_after(now);
                let wait = (next - now).to_std().unwrap_or_default();
                debug!(
                    "Next scan for {} at {next} (in {}s)",
                    schedule.integration_id,
                    wait.as_secs()
                );
                tokio::time::sleep(wait).await;
                inner.fire(schedule.integration_id, None);
            }
        })
    }

    /// Claims the integration's in-flight slot and spawns the scan.
    fn fire(self: &Arc<Self>, integration_id: Uuid, job_ids: Option<Vec<Uuid>>) -> bool {
        let claimed = self
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(integration_id);
        if !claimed {
            warn!("Scan for integration {integration_id} still running, skipping this firing");
            return false;
        }

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let _slot = InFlightSlot {
                inner: Arc::clone(&inner),
                integration_id,
            };
            inner.on_trigger(integration_id, job_ids).await;
        });
        true
    }

    /// Runs one scan to completion. Failures are logged, never propagated:
    /// the integration's trigger stays registered.
    async fn on_trigger(&self, integration_id: Uuid, job_ids: Option<Vec<Uuid>>) {
        info!("Executing scheduled scan for integration {integration_id}");
        match self.workflow.run(integration_id, job_ids).await {
            Ok(report) => info!(
                "Scan for integration {integration_id} finished: {} of {} resume(s) analyzed",
                report.analyzed, report.found
            ),
            Err(e) => error!("Error in scheduled scan for {integration_id}: {e}"),
        }
    }
}

/// Releases an integration's in-flight slot when the scan task ends, even if
/// the workflow panicked.
struct InFlightSlot {
    inner: Arc<Inner>,
    integration_id: Uuid,
}

impl Drop for InFlightSlot {
    fn drop(&mut self) {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.integration_id);
    }
}
