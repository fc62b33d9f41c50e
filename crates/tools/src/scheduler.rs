//! Reminder scheduler: announces due reminders on the event bus.
//!
//! Polls the [`ReminderStore`] at a fixed interval and publishes one
//! `ReminderTriggered` event per reminder that fell due. Runs until its
//! cancellation token fires.

use chrono::Utc;
use concierge_core::event::{AssistantEvent, EventBus};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::reminder::ReminderStore;

pub struct ReminderScheduler {
    store: ReminderStore,
    bus: EventBus,
    interval: Duration,
}

impl ReminderScheduler {
    pub fn new(store: ReminderStore, bus: EventBus, interval: Duration) -> Self {
        Self {
            store,
            bus,
            interval,
        }
    }

    /// Publish events for everything due now; returns how many fired.
    ///
    /// Announced reminders are dropped from the store afterwards.
    pub async fn check_now(&self) -> usize {
        let due = self.store.take_due(Utc::now()).await;
        for reminder in &due {
            info!(id = reminder.id, title = %reminder.title, "Reminder triggered");
            self.bus.publish(AssistantEvent::ReminderTriggered {
                id: reminder.id.to_string(),
                title: reminder.title.clone(),
                description: reminder.description.clone(),
                due_at: reminder.due_at,
            });
        }
        if !due.is_empty() {
            let removed = self.store.clear_notified().await;
            debug!(removed, "Dropped announced reminders");
        }
        due.len()
    }

    /// Run the polling loop on its own task.
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "Reminder scheduler started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let fired = self.check_now().await;
                        if fired > 0 {
                            debug!(fired, "Reminder check completed");
                        }
                    }
                }
            }

            info!("Reminder scheduler stopped");
        })
    }
}
