//! Convert attribute values to types that sqlx can bind.

use crate::value::Value;
use chrono::NaiveDateTime;
use sqlx::encode::{Encode, IsNull};
use sqlx::postgres::{PgTypeInfo, Postgres};
use sqlx::{Database, Type};

/// A value that can be bound to a PostgreSQL query. Statements cast every
/// placeholder (`$n::int8`), so each variant only has to declare its own type.
#[derive(Clone, Debug, PartialEq)]
pub enum PgBindValue {
    Null,
    Bool(bool),
    I64(i64),
    F64(f64),
    String(String),
    Timestamp(NaiveDateTime),
}

impl PgBindValue {
    pub fn from_value(v: &Value) -> Self {
        match v {
            Value::Null => PgBindValue::Null,
            Value::Boolean(b) => PgBindValue::Bool(*b),
            Value::Integer(n) | Value::Reference(n) => PgBindValue::I64(*n),
            Value::Decimal(n) => PgBindValue::F64(*n),
            Value::Text(s) => PgBindValue::String(s.clone()),
            Value::DateTime(dt) => PgBindValue::Timestamp(*dt),
            // Blob content is streamed, never bound as a scalar.
            Value::Blob(_) => PgBindValue::Null,
        }
    }
}

impl From<&Value> for PgBindValue {
    fn from(v: &Value) -> Self {
        PgBindValue::from_value(v)
    }
}

impl<'q> Encode<'q, Postgres> for PgBindValue {
    fn encode_by_ref(
        &self,
        buf: &mut <Postgres as Database>::ArgumentBuffer<'q>,
    ) -> Result<IsNull, Box<dyn std::error::Error + Send + Sync>> {
        Ok(match self {
            PgBindValue::Null => <Option<String> as Encode<Postgres>>::encode_by_ref(&None, buf)?,
            PgBindValue::Bool(b) => <bool as Encode<Postgres>>::encode_by_ref(b, buf)?,
            PgBindValue::I64(n) => <i64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::F64(n) => <f64 as Encode<Postgres>>::encode_by_ref(n, buf)?,
            PgBindValue::String(s) => {
                let s_ref: &str = s.as_str();
                <&str as Encode<Postgres>>::encode_by_ref(&s_ref, buf)?
            }
            PgBindValue::Timestamp(dt) => <NaiveDateTime as Encode<Postgres>>::encode_by_ref(dt, buf)?,
        })
    }

    fn produces(&self) -> Option<PgTypeInfo> {
        Some(match self {
            PgBindValue::Null | PgBindValue::String(_) => <String as Type<Postgres>>::type_info(),
            PgBindValue::Bool(_) => <bool as Type<Postgres>>::type_info(),
            PgBindValue::I64(_) => <i64 as Type<Postgres>>::type_info(),
            PgBindValue::F64(_) => <f64 as Type<Postgres>>::type_info(),
            PgBindValue::Timestamp(_) => <NaiveDateTime as Type<Postgres>>::type_info(),
        })
    }
}

impl Type<Postgres> for PgBindValue {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_name("TEXT")
    }

    fn compatible(_ty: &PgTypeInfo) -> bool {
        true
    }
}
