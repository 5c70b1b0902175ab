pub mod manager;
pub mod pool;

pub use manager::{ConnectionError, ConnectionHandle, TenantConnectionManager};
pub use pool::{redact_connection_string, PgPoolFactory, PoolError, PoolFactory};
