//! Application state shared by all handlers.

use sqlx::PgPool;

use labtasker_core::events::EventHub;
use labtasker_core::security::SecurityManager;
use labtasker_core::ServerConfig;
use labtasker_db::{CollectionRepository, QueueRepository, TaskRepository, WorkerRepository};

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub queues: QueueRepository,
    pub tasks: TaskRepository,
    pub workers: WorkerRepository,
    pub collections: CollectionRepository,
    pub events: EventHub,
}

impl AppState {
    pub fn new(pool: PgPool, config: &ServerConfig) -> Self {
        let security = SecurityManager::new(
            config.security_pepper.clone(),
            config.bcrypt_cost,
            config.min_password_length,
        );
        let events = EventHub::new();
        Self {
            queues: QueueRepository::new(pool.clone(), security),
            tasks: TaskRepository::new(pool.clone(), events.clone()),
            workers: WorkerRepository::new(pool.clone(), events.clone()),
            collections: CollectionRepository::new(pool.clone(), config.allow_unsafe_behavior),
            events,
            pool,
        }
    }
}
