//! Service initialization and dependency injection

use std::sync::Arc;

use tracing::info;

use crate::{
    clock::{Clock, SystemClock},
    repository::RoomStore,
    service::{JwtValidator, RoomLifecycleManager, RoomScheduler, SignalingRelay},
    Config,
};

/// Container for all initialized services
#[derive(Clone)]
pub struct Services {
    /// Process-wide signaling relay
    pub relay: Arc<SignalingRelay>,
    /// Room lifecycle state machine
    pub rooms: Arc<RoomLifecycleManager>,
    /// Scheduled activation and reminders
    pub scheduler: Arc<RoomScheduler>,
    /// Bearer token verification
    pub validator: JwtValidator,
}

/// Wire the relay, lifecycle manager and scheduler around one Room Store
pub fn init_services(store: Arc<dyn RoomStore>, config: &Config) -> anyhow::Result<Services> {
    info!("Initializing services...");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let validator = JwtValidator::new(&config.auth)?;
    let relay = Arc::new(SignalingRelay::new(config.signaling.clone()));
    let rooms = Arc::new(RoomLifecycleManager::new(
        store,
        Arc::clone(&relay),
        config.rooms.clone(),
        clock,
    ));
    let scheduler = Arc::new(RoomScheduler::new(Arc::clone(&rooms), &config.scheduler));

    info!("Services initialized");

    Ok(Services {
        relay,
        rooms,
        scheduler,
        validator,
    })
}
