//! # Hitman Service
//!
//! Explicit wiring of the hit lifecycle:
//!
//! ```text
//! start():    bus ─> manager ─> completion handler
//!             subscribe event logger (own thread)
//!             spawn expiry scheduler
//!
//! shutdown(): stop scheduler ─> drain kill tasks ─> unsubscribe logger
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use hitman_core::{
    Collaborators, CompletionHandler, CompletionOutcome, EventBus, EventReceiver, ExpiryScheduler,
    HitEvent, HitManager, HitStore, KillEvent, SharedConfig,
};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::leaderboard::Leaderboard;

/// Capacity of each event subscriber channel.
const EVENT_CAPACITY: usize = 1024;

/// How often the logger thread re-checks its running flag.
const LOGGER_POLL: Duration = Duration::from_millis(100);

/// Logs every domain event on a dedicated thread.
struct EventLogger {
    running: Arc<AtomicBool>,
    subscription: hitman_core::SubscriptionId,
    thread: JoinHandle<()>,
}

impl EventLogger {
    fn spawn(bus: &EventBus) -> std::io::Result<Self> {
        let events = bus.subscribe();
        let subscription = events.id();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);

        let thread = thread::Builder::new()
            .name("hitman-event-log".into())
            .spawn(move || Self::run(&events, &flag))?;

        Ok(Self {
            running,
            subscription,
            thread,
        })
    }

    fn run(events: &EventReceiver, running: &AtomicBool) {
        while running.load(Ordering::Acquire) {
            if let Some(event) = events.recv_timeout(LOGGER_POLL) {
                Self::log(&event);
            }
        }
        for event in events.drain() {
            Self::log(&event);
        }
    }

    fn log(event: &HitEvent) {
        match event {
            HitEvent::HitPlaced(hit) => info!(
                "Hit {} placed on {} by {} for {}",
                hit.id,
                hit.target_player_id,
                hit.hirer_label(),
                hit.bounty
            ),
            HitEvent::HitRemoved(hit) => info!("Hit {} on {} removed", hit.id, hit.target_player_id),
            HitEvent::HitExpired(hit) => debug!("Hit {} on {} expired", hit.id, hit.target_player_id),
            HitEvent::HitCompleted {
                combined,
                killer_player_id,
            } => info!(
                "{} collected {} from {} hits on {}",
                killer_player_id,
                combined.bounty,
                combined.hit_ids.len(),
                combined.target_player_id
            ),
        }
    }

    fn stop(self, bus: &EventBus) {
        bus.unsubscribe(self.subscription);
        self.running.store(false, Ordering::Release);
        if self.thread.join().is_err() {
            error!("Event logger thread panicked");
        }
    }
}

/// The running hit system.
pub struct HitmanService {
    config: SharedConfig,
    bus: Arc<EventBus>,
    manager: Arc<HitManager>,
    completion: Arc<CompletionHandler>,
    collaborators: Collaborators,
    scheduler: Option<ExpiryScheduler>,
    logger: Option<EventLogger>,
    runtime: Handle,
    kill_tasks: Mutex<JoinSet<CompletionOutcome>>,
}

impl HitmanService {
    /// Wires everything and starts the background work.
    ///
    /// Must be called from within a tokio runtime; queued kills run on it.
    ///
    /// # Errors
    ///
    /// Fails if there is no current runtime or the event logger thread
    /// cannot be spawned.
    pub fn start(
        config: SharedConfig,
        store: Arc<dyn HitStore>,
        collaborators: Collaborators,
    ) -> std::io::Result<Self> {
        let runtime = Handle::try_current().map_err(std::io::Error::other)?;
        let bus = Arc::new(EventBus::new(EVENT_CAPACITY));
        let logger = EventLogger::spawn(&bus)?;

        let manager = Arc::new(HitManager::new(store, Arc::clone(&bus)));
        let completion = Arc::new(CompletionHandler::new(
            Arc::clone(&manager),
            config.clone(),
            collaborators.clone(),
        ));
        let scheduler = ExpiryScheduler::spawn(Arc::clone(&manager), config.subscribe());

        info!("Hitman service started");
        Ok(Self {
            config,
            bus,
            manager,
            completion,
            collaborators,
            scheduler: Some(scheduler),
            logger: Some(logger),
            runtime,
            kill_tasks: Mutex::new(JoinSet::new()),
        })
    }

    /// The hit manager, for placement and queries.
    #[must_use]
    pub fn manager(&self) -> &Arc<HitManager> {
        &self.manager
    }

    /// Live configuration.
    #[must_use]
    pub fn config(&self) -> &SharedConfig {
        &self.config
    }

    /// Event bus, for extra listeners.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// Host collaborators.
    #[must_use]
    pub fn collaborators(&self) -> &Collaborators {
        &self.collaborators
    }

    /// A new leaderboard subscribed to this service's events.
    #[must_use]
    pub fn leaderboard(&self) -> Leaderboard {
        Leaderboard::new(
            Arc::clone(&self.manager),
            &self.bus,
            self.config.clone(),
            Arc::clone(&self.collaborators.directory),
            Arc::clone(&self.collaborators.permissions),
        )
    }

    /// Handles a death and waits for the outcome.
    pub async fn on_player_death(&self, event: &KillEvent) -> CompletionOutcome {
        self.completion.handle_kill(event).await
    }

    /// Queues a death for handling and returns immediately.
    ///
    /// Safe to call from any thread, including ones outside the runtime.
    /// `shutdown` drains the queue.
    pub fn report_death(&self, event: KillEvent) {
        let completion = Arc::clone(&self.completion);
        let mut tasks = self.kill_tasks.lock();
        // Reap finished tasks so the set does not grow with uptime.
        while tasks.try_join_next().is_some() {}
        tasks.spawn_on(async move { completion.handle_kill(&event).await }, &self.runtime);
    }

    /// Stops the scheduler, finishes queued kills and unsubscribes listeners.
    pub async fn shutdown(mut self) {
        if let Some(scheduler) = self.scheduler.take() {
            scheduler.stop().await;
        }

        let mut tasks = std::mem::take(&mut *self.kill_tasks.lock());
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                error!("Kill handling task failed: {}", e);
            }
        }

        if let Some(logger) = self.logger.take() {
            let bus = Arc::clone(&self.bus);
            let joined = tokio::task::spawn_blocking(move || logger.stop(&bus)).await;
            if let Err(e) = joined {
                error!("Event logger shutdown failed: {}", e);
            }
        }

        info!("Hitman service stopped");
    }
}
