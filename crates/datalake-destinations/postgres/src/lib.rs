mod postgres_destination;
mod factory;

pub use postgres_destination::{PostgresEventLog, PostgresConfig};
pub use factory::PostgresSinkFactory;
