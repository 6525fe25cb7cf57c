//! Periodic scan of scheduled rooms: one-time reminders inside the
//! notification window, automatic activation once the start time passes.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::{config::SchedulerConfig, service::room::RoomLifecycleManager, Result};

/// Outcome of one scheduler pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub activated: usize,
    pub notified: usize,
    pub failed: usize,
}

pub struct RoomScheduler {
    rooms: Arc<RoomLifecycleManager>,
    interval: Duration,
    window: chrono::Duration,
}

impl RoomScheduler {
    #[must_use]
    pub fn new(rooms: Arc<RoomLifecycleManager>, config: &SchedulerConfig) -> Self {
        Self {
            rooms,
            interval: config.interval(),
            window: config.notification_window(),
        }
    }

    /// Run one pass at the manager's current time
    pub async fn tick(&self) -> Result<TickReport> {
        self.tick_at(self.rooms.now()).await
    }

    /// Run one pass as if it were `now`.
    ///
    /// A failure on one room is logged and counted; the pass moves on to the
    /// next room. Only failing to load the scheduled set aborts the pass.
    pub async fn tick_at(&self, now: DateTime<Utc>) -> Result<TickReport> {
        let rooms = self.rooms.list_scheduled().await?;
        let mut report = TickReport::default();

        for room in &rooms {
            if room.is_due(now) {
                match self.rooms.activate_if_due(&room.id, now).await {
                    Ok(Some(_)) => report.activated += 1,
                    Ok(None) => {}
                    Err(e) => {
                        report.failed += 1;
                        error!(room_id = %room.id, error = %e, "Failed to activate scheduled room");
                    }
                }
            } else if room.is_starting_soon(now, self.window) {
                match self.rooms.notify_starting_soon(room, now, self.window).await {
                    Ok(true) => report.notified += 1,
                    Ok(false) => {}
                    Err(e) => {
                        report.failed += 1;
                        error!(room_id = %room.id, error = %e, "Failed to send starting-soon notification");
                    }
                }
            }
        }

        debug!(
            scanned = rooms.len(),
            activated = report.activated,
            notified = report.notified,
            failed = report.failed,
            "Scheduler tick complete"
        );

        Ok(report)
    }

    /// Start the periodic task. Ticks never overlap: the next one is not
    /// scheduled until the current pass has returned.
    pub fn spawn(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!(interval_secs = self.interval.as_secs(), "Room scheduler started");

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = self.tick().await {
                            error!(error = %e, "Scheduler tick failed");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            info!("Room scheduler stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::{RoomsConfig, SignalingConfig};
    use crate::models::{CreateRoomRequest, MovieId, RoomStatus, Visibility};
    use crate::repository::{MockRoomStore, RoomStore};
    use crate::service::relay::SignalingRelay;
    use crate::test_helpers::{scheduled_room, test_participant, TestStack};
    use crate::Error;
    use chrono::Duration as ChronoDuration;
    use movienight_proto::ServerMessage;
    use tokio::sync::mpsc;

    fn scheduler(stack: &TestStack) -> RoomScheduler {
        RoomScheduler::new(Arc::clone(&stack.rooms), &SchedulerConfig::default())
    }

    async fn scheduled(stack: &TestStack, minutes_ahead: i64) -> crate::models::Room {
        let request = CreateRoomRequest {
            name: "Premiere".to_string(),
            movie_id: MovieId::from("movie-1"),
            visibility: Visibility::Public,
            theme: None,
            start_time: Some(stack.clock.now() + ChronoDuration::minutes(minutes_ahead)),
            max_participants: None,
            admin_enabled: false,
        };
        stack.rooms.create(test_participant("host"), request).await.unwrap()
    }

    fn listen(stack: &TestStack, room_id: &crate::models::RoomId) -> mpsc::Receiver<ServerMessage> {
        let (conn, rx) = stack.relay.register(test_participant("host"));
        stack
            .relay
            .subscribe(&conn, room_id.clone(), test_participant("host"))
            .unwrap();
        rx
    }

    fn event_types(rx: &mut mpsc::Receiver<ServerMessage>) -> Vec<&'static str> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg.event_type());
        }
        out
    }

    #[tokio::test]
    async fn test_reminder_then_activation_then_quiet() {
        let stack = TestStack::new();
        let scheduler = scheduler(&stack);
        let t0 = stack.clock.now();
        let room = scheduled(&stack, 5).await;
        let mut rx = listen(&stack, &room.id);

        let report = scheduler.tick_at(t0 + ChronoDuration::minutes(1)).await.unwrap();
        assert_eq!(report.notified, 1);
        assert_eq!(event_types(&mut rx), vec!["room-starting-soon"]);

        let report = scheduler.tick_at(t0 + ChronoDuration::minutes(2)).await.unwrap();
        assert_eq!(report, TickReport::default());
        assert!(event_types(&mut rx).is_empty());

        let report = scheduler.tick_at(t0 + ChronoDuration::minutes(6)).await.unwrap();
        assert_eq!(report.activated, 1);
        assert_eq!(event_types(&mut rx), vec!["room-started"]);
        assert_eq!(stack.rooms.get(&room.id).await.unwrap().status, RoomStatus::Active);

        let report = scheduler.tick_at(t0 + ChronoDuration::minutes(7)).await.unwrap();
        assert_eq!(report, TickReport::default());
        assert!(event_types(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn test_room_outside_window_is_left_alone() {
        let stack = TestStack::new();
        let scheduler = scheduler(&stack);
        let room = scheduled(&stack, 60).await;

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report, TickReport::default());
        assert!(!stack.rooms.get(&room.id).await.unwrap().notification_sent);
    }

    #[tokio::test]
    async fn test_overdue_room_activates_without_reminder() {
        let stack = TestStack::new();
        let scheduler = scheduler(&stack);
        let t0 = stack.clock.now();
        let room = scheduled(&stack, 5).await;
        let mut rx = listen(&stack, &room.id);

        // the process was down through the whole window
        let report = scheduler.tick_at(t0 + ChronoDuration::minutes(30)).await.unwrap();
        assert_eq!(report.activated, 1);
        assert_eq!(report.notified, 0);
        assert_eq!(event_types(&mut rx), vec!["room-started"]);
    }

    #[tokio::test]
    async fn test_failure_on_one_room_does_not_stop_the_tick() {
        let now = Utc::now();
        let broken = scheduled_room("h1", now - ChronoDuration::minutes(1), now - ChronoDuration::hours(1));
        let healthy = scheduled_room("h2", now - ChronoDuration::minutes(1), now - ChronoDuration::hours(1));
        let broken_id = broken.id.clone();
        let healthy_id = healthy.id.clone();

        let mut store = MockRoomStore::new();
        let listed = vec![broken, healthy.clone()];
        store
            .expect_list_scheduled()
            .returning(move || Ok(listed.clone()));
        store
            .expect_activate_due()
            .withf(move |id, _| *id == broken_id)
            .returning(|_, _| Err(Error::Internal("connection reset".to_string())));
        store
            .expect_activate_due()
            .withf(move |id, _| *id == healthy_id)
            .returning(move |_, _| {
                let mut room = healthy.clone();
                room.status = RoomStatus::Active;
                Ok(Some(room))
            });

        let manager = Arc::new(RoomLifecycleManager::new(
            Arc::new(store) as Arc<dyn RoomStore>,
            Arc::new(SignalingRelay::new(SignalingConfig::default())),
            RoomsConfig::default(),
            Arc::new(ManualClock::new(now)),
        ));
        let scheduler = RoomScheduler::new(manager, &SchedulerConfig::default());

        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.activated, 1);
    }

    #[tokio::test]
    async fn test_listing_failure_aborts_only_that_tick() {
        let mut store = MockRoomStore::new();
        store
            .expect_list_scheduled()
            .times(1)
            .returning(|| Err(Error::Internal("pool timed out".to_string())));

        let manager = Arc::new(RoomLifecycleManager::new(
            Arc::new(store) as Arc<dyn RoomStore>,
            Arc::new(SignalingRelay::new(SignalingConfig::default())),
            RoomsConfig::default(),
            Arc::new(ManualClock::new(Utc::now())),
        ));
        let scheduler = RoomScheduler::new(manager, &SchedulerConfig::default());

        assert!(scheduler.tick().await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawned_scheduler_ticks_and_stops() {
        let stack = TestStack::new();
        let room = scheduled(&stack, 5).await;
        let scheduler = Arc::new(scheduler(&stack));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = scheduler.spawn(shutdown_rx);
        // first interval tick fires immediately
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(stack.rooms.get(&room.id).await.unwrap().notification_sent);

        stack.clock.advance(ChronoDuration::minutes(6));
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(stack.rooms.get(&room.id).await.unwrap().status, RoomStatus::Active);

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
