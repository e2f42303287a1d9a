//! Builds parameterized SELECT, INSERT, UPDATE, DELETE and blob statements from record type descriptors.

use crate::config::{AttributeDescriptor, RecordTypeDescriptor, ValueKind};
use crate::query::{FilterExpression, OrderBySpec, SortDirection};
use crate::record::Record;
use crate::store::SelectQuery;
use crate::value::Value;

/// Quote identifier for PostgreSQL (safe: only from config).
pub(crate) fn quoted(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

/// Full qualified table name.
fn qualified_table(desc: &RecordTypeDescriptor) -> String {
    format!("{}.{}", quoted(desc.namespace()), quoted(desc.table_name()))
}

fn identity_column(desc: &RecordTypeDescriptor) -> String {
    quoted(&desc.identity_attribute().name)
}

pub struct QueryBuf {
    pub sql: String,
    pub params: Vec<Value>,
}

impl QueryBuf {
    fn new() -> Self {
        QueryBuf {
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push_param(&mut self, v: Value) -> u32 {
        let n = self.params.len() as u32 + 1;
        self.params.push(v);
        n
    }
}

/// Cast applied to placeholders and selected columns so decoding is uniform per kind.
pub fn pg_cast(kind: ValueKind) -> &'static str {
    match kind {
        ValueKind::Integer | ValueKind::Reference => "int8",
        ValueKind::Decimal => "float8",
        ValueKind::Text => "text",
        ValueKind::Boolean => "bool",
        ValueKind::DateTime => "timestamp",
        ValueKind::Blob => "bytea",
    }
}

/// Column as compared or sorted. Text compares bytewise, like the in-memory engine.
fn comparable(name: &str, kind: ValueKind) -> String {
    if kind == ValueKind::Text {
        format!("{} COLLATE \"C\"", quoted(name))
    } else {
        quoted(name)
    }
}

/// SELECT list: every attribute cast to its decode type; blobs as their byte length.
fn select_column_list(desc: &RecordTypeDescriptor) -> String {
    desc.attributes()
        .iter()
        .map(|a| {
            let q = quoted(&a.name);
            if a.kind == ValueKind::Blob {
                format!("octet_length({})::int8 AS {}", q, q)
            } else {
                format!("{}::{} AS {}", q, pg_cast(a.kind), q)
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Attributes written by INSERT / UPDATE: everything but identity and blobs.
fn scalar_columns(desc: &RecordTypeDescriptor) -> impl Iterator<Item = (usize, &AttributeDescriptor)> {
    desc.attributes()
        .iter()
        .enumerate()
        .filter(|(_, a)| !a.is_identity() && a.kind != ValueKind::Blob)
}

fn push_predicate(q: &mut QueryBuf, out: &mut String, expr: &FilterExpression) {
    match expr {
        FilterExpression::Comparison { path, op, literal } => {
            let n = q.push_param(literal.clone());
            out.push_str(&format!(
                "{} {} ${}::{}",
                comparable(path.name(), path.kind()),
                op.sql_operator(),
                n,
                pg_cast(path.kind())
            ));
        }
        FilterExpression::And(l, r) | FilterExpression::Or(l, r) => {
            let joiner = if matches!(expr, FilterExpression::And(..)) {
                " AND "
            } else {
                " OR "
            };
            out.push('(');
            push_predicate(q, out, l);
            out.push_str(joiner);
            push_predicate(q, out, r);
            out.push(')');
        }
        // Binary children bring their own parentheses.
        FilterExpression::Not(inner) => match inner.as_ref() {
            FilterExpression::And(..) | FilterExpression::Or(..) => {
                out.push_str("NOT ");
                push_predicate(q, out, inner);
            }
            _ => {
                out.push_str("NOT (");
                push_predicate(q, out, inner);
                out.push(')');
            }
        },
    }
}

/// WHERE clause for a filter. SQL's NULL semantics give the same three-valued result as `evaluate`.
fn where_clause(q: &mut QueryBuf, filter: Option<&FilterExpression>) -> String {
    let Some(filter) = filter else {
        return String::new();
    };
    let mut out = String::from(" WHERE ");
    push_predicate(q, &mut out, filter);
    out
}

/// ORDER BY the requested terms, then identity ascending.
fn order_clause(desc: &RecordTypeDescriptor, order: &OrderBySpec) -> String {
    let mut terms: Vec<String> = order
        .terms()
        .iter()
        .map(|t| {
            let direction = match t.direction {
                SortDirection::Ascending => "ASC NULLS LAST",
                SortDirection::Descending => "DESC NULLS FIRST",
            };
            format!("{} {}", comparable(t.path.name(), t.path.kind()), direction)
        })
        .collect();
    terms.push(format!("{} ASC", identity_column(desc)));
    format!(" ORDER BY {}", terms.join(", "))
}

/// SELECT with optional filter, order, LIMIT and OFFSET.
pub fn select_list(desc: &RecordTypeDescriptor, query: &SelectQuery) -> QueryBuf {
    let mut q = QueryBuf::new();
    let table = qualified_table(desc);
    let where_clause = where_clause(&mut q, query.filter.as_ref());
    let order_clause = order_clause(desc, &query.order);
    let limit_clause = query.top.map(|n| format!(" LIMIT {}", n)).unwrap_or_default();
    let offset_clause = if query.skip > 0 {
        format!(" OFFSET {}", query.skip)
    } else {
        String::new()
    };
    let cols = select_column_list(desc);
    q.sql = format!(
        "SELECT {} FROM {}{}{}{}{}",
        cols, table, where_clause, order_clause, limit_clause, offset_clause
    );
    q
}

pub fn count(desc: &RecordTypeDescriptor, filter: Option<&FilterExpression>) -> QueryBuf {
    let mut q = QueryBuf::new();
    let where_clause = where_clause(&mut q, filter);
    q.sql = format!("SELECT COUNT(*) FROM {}{}", qualified_table(desc), where_clause);
    q
}

/// SELECT by identity.
pub fn select_by_id(desc: &RecordTypeDescriptor, id: i64) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(Value::Integer(id));
    q.sql = format!(
        "SELECT {} FROM {} WHERE {} = ${}",
        select_column_list(desc),
        qualified_table(desc),
        identity_column(desc),
        n
    );
    q
}

/// INSERT every scalar attribute; the database assigns identity and leaves blobs null.
pub fn insert(record: &Record) -> QueryBuf {
    let desc = record.descriptor();
    let mut q = QueryBuf::new();
    let table = qualified_table(desc);
    let mut cols = Vec::new();
    let mut placeholders = Vec::new();
    for (i, attr) in scalar_columns(desc) {
        let n = q.push_param(record.values()[i].clone());
        cols.push(quoted(&attr.name));
        placeholders.push(format!("${}::{}", n, pg_cast(attr.kind)));
    }
    let returning = select_column_list(desc);
    q.sql = if cols.is_empty() {
        format!("INSERT INTO {} DEFAULT VALUES RETURNING {}", table, returning)
    } else {
        format!(
            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
            table,
            cols.join(", "),
            placeholders.join(", "),
            returning
        )
    };
    q
}

/// UPDATE by identity: SET every scalar attribute, blobs untouched.
pub fn update(record: &Record, id: i64) -> QueryBuf {
    let desc = record.descriptor();
    let mut q = QueryBuf::new();
    let mut sets = Vec::new();
    for (i, attr) in scalar_columns(desc) {
        let n = q.push_param(record.values()[i].clone());
        sets.push(format!("{} = ${}::{}", quoted(&attr.name), n, pg_cast(attr.kind)));
    }
    if sets.is_empty() {
        return select_by_id(desc, id);
    }
    let id_param = q.push_param(Value::Integer(id));
    q.sql = format!(
        "UPDATE {} SET {} WHERE {} = ${} RETURNING {}",
        qualified_table(desc),
        sets.join(", "),
        identity_column(desc),
        id_param,
        select_column_list(desc)
    );
    q
}

/// DELETE by identity.
pub fn delete(desc: &RecordTypeDescriptor, id: i64) -> QueryBuf {
    let mut q = QueryBuf::new();
    let n = q.push_param(Value::Integer(id));
    q.sql = format!(
        "DELETE FROM {} WHERE {} = ${}",
        qualified_table(desc),
        identity_column(desc),
        n
    );
    q
}

/// Session-local staging for one upload; dropped with the transaction either way.
pub const BLOB_STAGE_CREATE: &str = "CREATE TEMP TABLE entity_rest_blob_stage \
    (seq int8 PRIMARY KEY, chunk bytea NOT NULL) ON COMMIT DROP";

/// Binds: sequence number, chunk.
pub const BLOB_STAGE_APPEND: &str = "INSERT INTO pg_temp.entity_rest_blob_stage (seq, chunk) VALUES ($1, $2)";

/// Locks the target row for the upload. Binds: id.
pub fn blob_lock(desc: &RecordTypeDescriptor) -> String {
    format!(
        "SELECT 1 FROM {} WHERE {} = $1 FOR UPDATE",
        qualified_table(desc),
        identity_column(desc)
    )
}

/// Writes the staged chunks as one value, in a single row version. Binds: id.
pub fn blob_assemble(desc: &RecordTypeDescriptor, attribute: &str) -> String {
    format!(
        "UPDATE {} SET {} = COALESCE((SELECT string_agg(chunk, ''::bytea ORDER BY seq) \
         FROM pg_temp.entity_rest_blob_stage), ''::bytea) WHERE {} = $1",
        qualified_table(desc),
        quoted(attribute),
        identity_column(desc)
    )
}

/// Storage mode of a blob column: `e` (EXTERNAL) keeps `substring` reads proportional to
/// the chunk. Binds: schema, table, column.
pub const BLOB_STORAGE_MODE: &str = "SELECT a.attstorage::text FROM pg_attribute a \
    JOIN pg_class c ON a.attrelid = c.oid \
    JOIN pg_namespace n ON c.relnamespace = n.oid \
    WHERE n.nspname = $1 AND c.relname = $2 AND a.attname = $3 AND NOT a.attisdropped";

/// Binds: id. One row per record; a null length means no content.
pub fn blob_length(desc: &RecordTypeDescriptor, attribute: &str) -> String {
    format!(
        "SELECT octet_length({})::int8 FROM {} WHERE {} = $1",
        quoted(attribute),
        qualified_table(desc),
        identity_column(desc)
    )
}

/// Binds: 1-based offset, length, id.
pub fn blob_chunk(desc: &RecordTypeDescriptor, attribute: &str) -> String {
    format!(
        "SELECT substring({} FROM $1::int4 FOR $2::int4) FROM {} WHERE {} = $3",
        quoted(attribute),
        qualified_table(desc),
        identity_column(desc)
    )
}
