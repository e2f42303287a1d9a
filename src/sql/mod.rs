//! PostgreSQL statement compiler: identifiers from the schema registry only, values always as parameters.

pub mod builder;
pub mod params;
pub use builder::QueryBuf;
pub use params::PgBindValue;
