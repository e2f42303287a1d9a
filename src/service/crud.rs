//! Generic CRUD execution against whichever `RecordStore` is configured.

use crate::config::{RecordTypeDescriptor, ValueKind};
use crate::error::AppError;
use crate::query::{FilterExpression, OrderBySpec};
use crate::record::Record;
use crate::store::{RecordStore, SelectQuery};
use std::sync::Arc;

pub struct QueryExecutor<'a> {
    store: &'a dyn RecordStore,
}

fn non_negative(name: &str, n: i64) -> Result<u64, AppError> {
    u64::try_from(n).map_err(|_| AppError::BadRequest(format!("{} must not be negative (got {})", name, n)))
}

impl<'a> QueryExecutor<'a> {
    pub fn new(store: &'a dyn RecordStore) -> Self {
        Self { store }
    }

    /// Filter, then order (identity ascending breaks ties), then skip, then take `top`.
    pub fn find(
        &self,
        desc: &Arc<RecordTypeDescriptor>,
        top: Option<i64>,
        skip: Option<i64>,
        filter: Option<FilterExpression>,
        order: OrderBySpec,
    ) -> Result<Vec<Record>, AppError> {
        let skip = non_negative("$skip", skip.unwrap_or(0))?;
        let top = top.map(|t| non_negative("$top", t)).transpose()?;
        Self::check_filter(desc, filter.as_ref())?;
        if order.terms().iter().any(|t| t.path.entity() != desc.name()) {
            return Err(AppError::BadRequest(format!("order does not apply to {}", desc.name())));
        }
        let query = SelectQuery {
            filter,
            order,
            skip,
            top,
        };
        tracing::debug!(
            entity = desc.name(),
            filter = ?query.filter.as_ref().map(ToString::to_string),
            order = %query.order,
            skip,
            top = ?top,
            "find"
        );
        Ok(self.store.select(desc, &query)?)
    }

    pub fn count(&self, desc: &RecordTypeDescriptor, filter: Option<&FilterExpression>) -> Result<u64, AppError> {
        Self::check_filter(desc, filter)?;
        Ok(self.store.count(desc, filter)?)
    }

    pub fn find_by_id(&self, desc: &Arc<RecordTypeDescriptor>, id: i64) -> Result<Option<Record>, AppError> {
        Ok(self.store.get(desc, id)?)
    }

    /// Insert when identity is unset, otherwise update in place (`NotFound` if gone).
    pub fn save(&self, record: Record) -> Result<Record, AppError> {
        Self::check_required(&record)?;
        match record.id() {
            None => {
                let saved = self.store.insert(&record)?;
                tracing::info!(entity = saved.entity(), id = ?saved.id(), "record created");
                Ok(saved)
            }
            Some(id) => {
                let saved = self.store.update(&record)?;
                tracing::info!(entity = saved.entity(), id, "record updated");
                Ok(saved)
            }
        }
    }

    pub fn remove(&self, desc: &RecordTypeDescriptor, id: i64) -> Result<(), AppError> {
        self.store.delete(desc, id)?;
        tracing::info!(entity = desc.name(), id, "record deleted");
        Ok(())
    }

    /// Unsaved copy of an existing record with identity unset.
    pub fn duplicate(&self, desc: &Arc<RecordTypeDescriptor>, id: i64) -> Result<Option<Record>, AppError> {
        Ok(self.find_by_id(desc, id)?.map(|r| r.duplicate()))
    }

    fn check_filter(desc: &RecordTypeDescriptor, filter: Option<&FilterExpression>) -> Result<(), AppError> {
        match filter {
            Some(f) if !f.belongs_to(desc.name()) => Err(AppError::BadRequest(format!(
                "filter does not apply to {}",
                desc.name()
            ))),
            _ => Ok(()),
        }
    }

    /// Non-nullable attributes must be set. Identity is store-assigned and blobs are uploaded separately.
    fn check_required(record: &Record) -> Result<(), AppError> {
        let desc = record.descriptor();
        for (attr, value) in desc.attributes().iter().zip(record.values()) {
            if !attr.nullable && !attr.is_identity() && attr.kind != ValueKind::Blob && value.is_null() {
                return Err(AppError::BadRequest(format!(
                    "{}.{} is required",
                    desc.name(),
                    attr.name
                )));
            }
        }
        Ok(())
    }
}
