use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use switchboard_channels::ChannelManager;
use switchboard_config::CronConfig;
use switchboard_core::{ChannelContext, EventSink, GatewayEvent, Result, SwitchboardError};
use switchboard_dispatch::{DispatchRequest, Dispatcher};

use crate::schedule::next_fire;
use crate::store::{CronStore, FileStore};
use crate::types::{CronJob, CronSchedule, NewCronJob};

/// A loaded job and when it fires next.
struct Entry {
    job: CronJob,
    anchor: DateTime<Utc>,
    next: Option<DateTime<Utc>>,
}

impl Entry {
    fn new(job: CronJob, anchor: DateTime<Utc>) -> Self {
        let next = match next_fire(&job.schedule, anchor, anchor) {
            Ok(next) => next,
            Err(e) => {
                warn!(job = %job.id, error = %e, "cron job has an unusable schedule, it will not fire");
                None
            }
        };
        Self { job, anchor, next }
    }
}

/// Everything a firing needs, detached from the scheduler so it can run
/// in its own task.
#[derive(Clone)]
struct Runner {
    dispatcher: Dispatcher,
    channels: Option<Arc<ChannelManager>>,
    sink: Arc<dyn EventSink>,
}

impl Runner {
    async fn fire(self, job: CronJob) {
        info!(job = %job.id, name = %job.name, schedule = %job.schedule, "cron job firing");
        self.sink.emit(GatewayEvent::TaskCreated {
            source: "cron".into(),
            summary: job.name.clone(),
        });

        let mut request = DispatchRequest::new(job.message.clone());
        if let Some(target) = &job.target {
            request = request.with_context(ChannelContext {
                channel: target.channel.clone(),
                sender_id: "cron".into(),
                sender_name: job.name.clone(),
                chat_id: target.chat_id.clone(),
            });
        }

        match self.dispatcher.dispatch(request, |_| {}).await {
            Ok(outcome) => self.deliver(&job, &outcome.text),
            Err(e) => {
                warn!(job = %job.id, error = %e, "cron job dispatch failed");
                self.sink.emit(GatewayEvent::Notice {
                    message: format!("Scheduled job '{}' failed: {e}", job.name),
                });
            }
        }
    }

    fn deliver(&self, job: &CronJob, text: &str) {
        let Some(target) = &job.target else {
            self.broadcast(job, text);
            return;
        };
        let Some(channels) = &self.channels else {
            warn!(job = %job.id, channel = %target.channel, "no channel manager, broadcasting instead");
            self.broadcast(job, text);
            return;
        };
        match channels.send(&target.channel, &target.chat_id, text) {
            Ok(chunks) => debug!(job = %job.id, channel = %target.channel, chunks, "cron reply queued"),
            Err(e) => {
                warn!(job = %job.id, channel = %target.channel, error = %e, "cron reply not delivered");
                self.sink.emit(GatewayEvent::Notice {
                    message: format!(
                        "Scheduled job '{}' could not reach {}: {e}",
                        job.name, target.channel
                    ),
                });
            }
        }
    }

    fn broadcast(&self, job: &CronJob, text: &str) {
        self.sink.emit(GatewayEvent::CronResult {
            job_id: job.id.clone(),
            name: job.name.clone(),
            text: text.to_string(),
        });
    }
}

/// Fires stored jobs on their schedules.
///
/// The store is the source of truth: `start()` reloads it in full, and
/// `add_job`/`remove_job` write through before touching the live set.
pub struct CronScheduler {
    store: Arc<dyn CronStore>,
    runner: Runner,
    tick: Duration,
    entries: Mutex<Vec<Entry>>,
    firing: Mutex<JoinSet<()>>,
    cancel: Mutex<CancellationToken>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl CronScheduler {
    pub fn new(store: Arc<dyn CronStore>, dispatcher: Dispatcher, sink: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            runner: Runner {
                dispatcher,
                channels: None,
                sink,
            },
            tick: Duration::from_secs(1),
            entries: Mutex::new(Vec::new()),
            firing: Mutex::new(JoinSet::new()),
            cancel: Mutex::new(CancellationToken::new()),
            handle: Mutex::new(None),
        }
    }

    /// File-backed scheduler for `[cron]`.
    pub fn from_config(config: &CronConfig, dispatcher: Dispatcher, sink: Arc<dyn EventSink>) -> Self {
        Self::new(Arc::new(FileStore::new(&config.jobs_path)), dispatcher, sink)
            .with_tick(Duration::from_millis(config.tick_ms.max(10)))
    }

    /// Deliver targeted replies through this manager.
    pub fn with_channels(mut self, channels: Arc<ChannelManager>) -> Self {
        self.runner.channels = Some(channels);
        self
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Replace the live set with the store's contents. Returns the job count.
    pub async fn reload(&self) -> Result<usize> {
        let jobs = self.store.load_jobs().await?;
        let now = Utc::now();
        let entries: Vec<_> = jobs.into_iter().map(|job| Entry::new(job, now)).collect();
        let count = entries.len();
        *self.entries.lock() = entries;
        Ok(count)
    }

    /// Reload the store and run the tick loop until [`stop`](Self::stop).
    /// A store that cannot be read leaves the scheduler running with no jobs.
    pub async fn start(self: &Arc<Self>) {
        if self.is_running() {
            return;
        }
        match self.reload().await {
            Ok(count) => info!(jobs = count, tick = ?self.tick, "cron scheduler started"),
            Err(e) => {
                warn!(error = %e, "could not load cron jobs, starting empty");
                self.entries.lock().clear();
            }
        }

        let cancel = CancellationToken::new();
        *self.cancel.lock() = cancel.clone();
        let scheduler = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {}
                }
                scheduler.run_due(Utc::now()).await;
            }
            debug!("cron loop stopped");
        });
        *self.handle.lock() = Some(handle);
    }

    pub fn is_running(&self) -> bool {
        self.handle.lock().as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Halt the loop and abort firings still in progress. Nothing fires
    /// after this returns.
    pub async fn stop(&self) {
        self.cancel.lock().cancel();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        let mut firing = std::mem::take(&mut *self.firing.lock());
        firing.abort_all();
        while firing.join_next().await.is_some() {}
        info!("cron scheduler stopped");
    }

    /// Fire every job due at `now` and schedule its next run. Returns how
    /// many fired. The firings run in the background; see [`wait_idle`](Self::wait_idle).
    pub async fn run_due(&self, now: DateTime<Utc>) -> usize {
        let due: Vec<CronJob> = {
            let mut entries = self.entries.lock();
            let mut due = Vec::new();
            for entry in entries.iter_mut() {
                let Some(next) = entry.next else { continue };
                if next > now {
                    continue;
                }
                due.push(entry.job.clone());
                entry.next = match entry.job.schedule {
                    CronSchedule::Once { .. } => None,
                    _ => next_fire(&entry.job.schedule, entry.anchor, now).ok().flatten(),
                };
            }
            entries.retain(|e| !(matches!(e.job.schedule, CronSchedule::Once { .. }) && e.next.is_none()));
            due
        };

        for job in &due {
            // Spent before it fires, so a crash mid-run cannot fire it twice.
            if let CronSchedule::Once { .. } = job.schedule {
                match self.store.delete_job(&job.id).await {
                    Ok(()) | Err(SwitchboardError::JobNotFound(_)) => {}
                    Err(e) => warn!(job = %job.id, error = %e, "could not remove spent one-time job"),
                }
            }
        }

        let mut firing = self.firing.lock();
        while firing.try_join_next().is_some() {}
        for job in &due {
            firing.spawn(self.runner.clone().fire(job.clone()));
        }
        due.len()
    }

    /// Firings still held, running or finished but not yet reaped.
    pub fn firing_backlog(&self) -> usize {
        self.firing.lock().len()
    }

    /// Wait for every firing started so far.
    pub async fn wait_idle(&self) {
        let mut firing = std::mem::take(&mut *self.firing.lock());
        while firing.join_next().await.is_some() {}
    }

    /// Validate, persist and schedule a new job.
    pub async fn add_job(&self, new: NewCronJob) -> Result<CronJob> {
        let job = new.into_job()?;
        self.store.save_job(&job).await?;
        info!(job = %job.id, name = %job.name, schedule = %job.schedule, "cron job added");
        self.entries.lock().push(Entry::new(job.clone(), job.created_at));
        Ok(job)
    }

    pub async fn remove_job(&self, id: &str) -> Result<()> {
        self.store.delete_job(id).await?;
        self.entries.lock().retain(|e| e.job.id != id);
        info!(job = %id, "cron job removed");
        Ok(())
    }

    /// Live jobs, oldest first.
    pub fn list_jobs(&self) -> Vec<CronJob> {
        let mut jobs: Vec<_> = self.entries.lock().iter().map(|e| e.job.clone()).collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        jobs
    }

    pub fn next_fire_of(&self, id: &str) -> Option<DateTime<Utc>> {
        self.entries
            .lock()
            .iter()
            .find(|e| e.job.id == id)
            .and_then(|e| e.next)
    }
}
