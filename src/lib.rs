//! Entity REST: schema-driven query, mapping and blob streaming over persisted record types.

pub mod config;
pub mod error;
pub mod handlers;
pub mod query;
pub mod record;
pub mod response;
pub mod routes;
pub mod service;
pub mod settings;
pub mod sql;
pub mod state;
pub mod store;
pub mod value;

#[cfg(test)]
mod test_support;

pub use config::{load_from_path, load_from_str, resolve, RecordTypeDescriptor, SchemaConfig, SchemaRegistry};
pub use error::{AppError, ConfigError};
pub use query::{AttributePath, AttributePathResolver, FilterExpression, FilterExpressionParser, OrderBySpec, OrderBySpecParser};
pub use record::Record;
pub use routes::{app, common_routes, entity_routes};
pub use service::{BlobStreamBridge, QueryExecutor, RecordMapper};
pub use settings::Settings;
pub use state::AppState;
pub use store::{MemoryStore, PgStore, RecordStore, StorageError};
pub use value::Value;
