pub mod blob;
pub mod crud;
pub mod mapper;

pub use blob::{BlobDownload, BlobStreamBridge};
pub use crud::QueryExecutor;
pub use mapper::{AttributeMap, RecordMapper};
