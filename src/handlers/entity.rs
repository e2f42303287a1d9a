//! Entity set handlers. The first path segment names the set (`Person`) or one record (`Person(7)`).
//! Store calls are synchronous, so each request body runs on a blocking worker.

use crate::config::ValueKind;
use crate::error::AppError;
use crate::handlers::blob;
use crate::query::{AttributePathResolver, FilterExpressionParser, OrderBySpecParser};
use crate::record::Record;
use crate::response::{success_many, success_one, success_one_ok, PropertyValue};
use crate::service::{AttributeMap, QueryExecutor, RecordMapper};
use crate::state::AppState;
use crate::store::StorageError;
use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::LazyLock;

const COUNT_KEYWORD: &str = "$count";
const VALUE_KEYWORD: &str = "$value";
const CLONE_ACTION: &str = "Clone";
const UPLOAD_ACTION: &str = "Upload";
const DOWNLOAD_ACTION: &str = "Download";

/// `Entity(id)`: name, then everything inside the outer parentheses.
static RECORD_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([^()]+)\((.*)\)$").expect("record segment pattern"));

/// Parsed first path segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Target {
    pub entity: String,
    pub id: Option<i64>,
}

impl Target {
    fn require_id(&self) -> Result<i64, AppError> {
        self.id
            .ok_or_else(|| AppError::BadRequest(format!("{} needs a record Id, as in {}(1)", self.entity, self.entity)))
    }

    fn require_collection(&self, what: &str) -> Result<(), AppError> {
        match self.id {
            Some(_) => Err(AppError::MalformedRequest(format!("{} applies to the {} set, not a record", what, self.entity))),
            None => Ok(()),
        }
    }
}

pub(crate) fn unknown_keyword(keyword: &str) -> AppError {
    AppError::MalformedRequest(format!("Unknown keyword {}.", keyword))
}

pub(crate) fn parse_segment(segment: &str) -> Result<Target, AppError> {
    if segment.starts_with('$') {
        return Err(unknown_keyword(segment));
    }
    let Some(caps) = RECORD_SEGMENT.captures(segment) else {
        return Ok(Target {
            entity: segment.to_string(),
            id: None,
        });
    };
    let raw_id = &caps[2];
    let id = raw_id
        .trim()
        .parse::<i64>()
        .map_err(|_| AppError::BadRequest(format!("invalid Id '{}'", raw_id)))?;
    Ok(Target {
        entity: caps[1].to_string(),
        id: Some(id),
    })
}

/// Runs `f` on a blocking worker.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Storage(StorageError::Runtime(e.to_string())))?
}

/// Stored record addressed by `target`; `NotFound` when it is gone.
pub(crate) fn load_record(state: &AppState, target: &Target) -> Result<Record, AppError> {
    let desc = state.registry.resolve(&target.entity)?;
    let id = target.require_id()?;
    QueryExecutor::new(state.store.as_ref())
        .find_by_id(desc, id)?
        .ok_or_else(|| AppError::NotFound(format!("no {} with Id {}", target.entity, id)))
}

/// JSON object of scalars to raw attribute text. Null members are left unset.
fn body_to_attrs(value: Value) -> Result<AttributeMap, AppError> {
    let Value::Object(members) = value else {
        return Err(AppError::BadRequest("body must be a JSON object".into()));
    };
    let mut attrs = AttributeMap::new();
    for (key, member) in members {
        let raw = match member {
            Value::Null => continue,
            Value::String(s) => s,
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Array(_) | Value::Object(_) => {
                return Err(AppError::BadRequest(format!("property {} must be a scalar", key)))
            }
        };
        attrs.insert(key, raw);
    }
    Ok(attrs)
}

#[derive(Debug, Default)]
struct ListOptions {
    top: Option<i64>,
    skip: Option<i64>,
    filter: Option<String>,
    order: Option<String>,
    count: bool,
}

fn parse_integer(key: &str, raw: &str) -> Result<i64, AppError> {
    raw.trim()
        .parse()
        .map_err(|_| AppError::BadRequest(format!("{} must be an integer (got '{}')", key, raw)))
}

/// Query options of a collection read. Other `$` keys are rejected; plain keys are ignored.
fn list_options(params: HashMap<String, String>) -> Result<ListOptions, AppError> {
    let mut opts = ListOptions::default();
    for (key, raw) in params {
        match key.as_str() {
            "$top" => opts.top = Some(parse_integer(&key, &raw)?),
            "$skip" => opts.skip = Some(parse_integer(&key, &raw)?),
            "$filter" => opts.filter = Some(raw),
            "$orderby" => opts.order = Some(raw),
            "$count" => {
                opts.count = match raw.as_str() {
                    "true" => true,
                    "false" => false,
                    _ => return Err(AppError::BadRequest(format!("$count must be true or false (got '{}')", raw))),
                }
            }
            other if other.starts_with('$') => return Err(unknown_keyword(other)),
            _ => {}
        }
    }
    Ok(opts)
}

/// `$filter` of a `$count` read. Paging, ordering and other `$` keys are rejected.
fn count_filter(params: HashMap<String, String>) -> Result<Option<String>, AppError> {
    let mut filter = None;
    for (key, raw) in params {
        match key.as_str() {
            "$filter" => filter = Some(raw),
            other if other.starts_with('$') => return Err(unknown_keyword(other)),
            _ => {}
        }
    }
    Ok(filter)
}

/// GET /:segment: list the set, or read one record.
pub async fn list_or_read(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let target = parse_segment(&segment)?;
    if target.id.is_some() {
        let record = blocking(move || load_record(&state, &target)).await?;
        return Ok(success_one_ok(record).into_response());
    }
    let opts = list_options(params)?;
    let (records, count) = blocking(move || {
        let desc = state.registry.resolve(&target.entity)?;
        let filter = FilterExpressionParser::parse(desc, opts.filter.as_deref())?;
        let order = OrderBySpecParser::parse(desc, opts.order.as_deref())?;
        let exec = QueryExecutor::new(state.store.as_ref());
        let count = if opts.count {
            Some(exec.count(desc, filter.as_ref())?)
        } else {
            None
        };
        let records = exec.find(desc, opts.top, opts.skip, filter, order)?;
        Ok((records, count))
    })
    .await?;
    Ok(success_many(records, count).into_response())
}

/// POST /:segment: create. A client-supplied Id is ignored.
pub async fn create(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let target = parse_segment(&segment)?;
    target.require_collection("create")?;
    let mut attrs = body_to_attrs(body)?;
    let saved = blocking(move || {
        let desc = state.registry.resolve(&target.entity)?;
        attrs.remove(&desc.identity_attribute().name);
        let record = RecordMapper::to_record(desc, &attrs)?;
        QueryExecutor::new(state.store.as_ref()).save(record)
    })
    .await?;
    Ok(success_one(saved))
}

/// PUT /:segment: replace every scalar attribute of one record.
pub async fn update(
    State(state): State<AppState>,
    Path(segment): Path<String>,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, AppError> {
    let target = parse_segment(&segment)?;
    let id = target
        .id
        .ok_or_else(|| AppError::Unsupported(format!("update of the whole {} set", target.entity)))?;
    let attrs = body_to_attrs(body)?;
    let saved = blocking(move || {
        let desc = state.registry.resolve(&target.entity)?;
        let attrs = RecordMapper::inject_identity(desc, attrs, id);
        let record = RecordMapper::to_record(desc, &attrs)?;
        QueryExecutor::new(state.store.as_ref()).save(record)
    })
    .await?;
    Ok(success_one_ok(saved))
}

/// DELETE /:segment
pub async fn remove(
    State(state): State<AppState>,
    Path(segment): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let target = parse_segment(&segment)?;
    let id = target
        .id
        .ok_or_else(|| AppError::Unsupported(format!("delete of the whole {} set", target.entity)))?;
    blocking(move || {
        let desc = state.registry.resolve(&target.entity)?;
        QueryExecutor::new(state.store.as_ref()).remove(desc, id)
    })
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Canonical text of one scalar property of a stored record.
async fn scalar_text(state: AppState, target: Target, property: String) -> Result<String, AppError> {
    blocking(move || {
        let record = load_record(&state, &target)?;
        let path = AttributePathResolver::resolve(record.descriptor(), &property)?;
        if path.kind() == ValueKind::Blob {
            return Err(AppError::BadRequest(format!(
                "property {} is binary; use {}/{}",
                path, path, DOWNLOAD_ACTION
            )));
        }
        RecordMapper::read_scalar_property(&record, &path)
    })
    .await
}

/// GET /:segment/:property: `$count`, `Clone`, or one property as `{"value": ...}`.
pub async fn read_property(
    State(state): State<AppState>,
    Path((segment, property)): Path<(String, String)>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let target = parse_segment(&segment)?;
    match property.as_str() {
        COUNT_KEYWORD => {
            target.require_collection(COUNT_KEYWORD)?;
            let filter = count_filter(params)?;
            let n = blocking(move || {
                let desc = state.registry.resolve(&target.entity)?;
                let filter = FilterExpressionParser::parse(desc, filter.as_deref())?;
                QueryExecutor::new(state.store.as_ref()).count(desc, filter.as_ref())
            })
            .await?;
            Ok(n.to_string().into_response())
        }
        CLONE_ACTION => {
            let copy = blocking(move || {
                let desc = state.registry.resolve(&target.entity)?;
                let id = target.require_id()?;
                QueryExecutor::new(state.store.as_ref())
                    .duplicate(desc, id)?
                    .ok_or_else(|| AppError::NotFound(format!("no {} with Id {}", target.entity, id)))
            })
            .await?;
            Ok(success_one_ok(copy).into_response())
        }
        keyword if keyword.starts_with('$') => Err(unknown_keyword(keyword)),
        _ => {
            let value = scalar_text(state, target, property).await?;
            Ok(Json(PropertyValue { value }).into_response())
        }
    }
}

/// PUT /:segment/:property
pub async fn write_property(Path((segment, property)): Path<(String, String)>) -> Result<StatusCode, AppError> {
    Err(AppError::Unsupported(format!("writing {}/{} directly", segment, property)))
}

/// GET /:segment/:property/:action: `$value` as plain text, or `Download`.
pub async fn read_property_action(
    State(state): State<AppState>,
    Path((segment, property, action)): Path<(String, String, String)>,
) -> Result<Response, AppError> {
    let target = parse_segment(&segment)?;
    match action.as_str() {
        VALUE_KEYWORD => Ok(scalar_text(state, target, property).await?.into_response()),
        DOWNLOAD_ACTION => blob::download(state, target, property).await,
        keyword if keyword.starts_with('$') => Err(unknown_keyword(keyword)),
        other => Err(AppError::MalformedRequest(format!("Unknown action {}.", other))),
    }
}

/// POST /:segment/:property/:action: `Upload` only.
pub async fn invoke_property_action(
    State(state): State<AppState>,
    Path((segment, property, action)): Path<(String, String, String)>,
    multipart: Multipart,
) -> Result<Response, AppError> {
    let target = parse_segment(&segment)?;
    match action.as_str() {
        UPLOAD_ACTION => blob::upload(state, target, property, multipart).await,
        keyword if keyword.starts_with('$') => Err(unknown_keyword(keyword)),
        other => Err(AppError::MalformedRequest(format!("Unknown action {}.", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_name_a_set_or_a_record() {
        assert_eq!(
            parse_segment("Person").unwrap(),
            Target {
                entity: "Person".into(),
                id: None
            }
        );
        assert_eq!(
            parse_segment("Person(42)").unwrap(),
            Target {
                entity: "Person".into(),
                id: Some(42)
            }
        );
        assert!(matches!(parse_segment("Person(abc)"), Err(AppError::BadRequest(_))));
        assert!(matches!(parse_segment("Person()"), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn leading_dollar_is_an_unknown_keyword() {
        match parse_segment("$metadata") {
            Err(AppError::MalformedRequest(msg)) => assert_eq!(msg, "Unknown keyword $metadata."),
            other => panic!("{:?}", other),
        }
    }

    #[test]
    fn body_members_become_text() {
        let attrs = body_to_attrs(serde_json::json!({
            "Name": "Ada",
            "Age": 36,
            "Score": 1.5,
            "Active": true,
            "Manager": null
        }))
        .unwrap();
        assert_eq!(attrs.get("Name").map(String::as_str), Some("Ada"));
        assert_eq!(attrs.get("Age").map(String::as_str), Some("36"));
        assert_eq!(attrs.get("Score").map(String::as_str), Some("1.5"));
        assert_eq!(attrs.get("Active").map(String::as_str), Some("true"));
        assert!(!attrs.contains_key("Manager"));

        assert!(matches!(body_to_attrs(serde_json::json!([1])), Err(AppError::BadRequest(_))));
        assert!(matches!(
            body_to_attrs(serde_json::json!({"Name": ["a"]})),
            Err(AppError::BadRequest(_))
        ));
    }

    #[test]
    fn list_options_reject_unknown_keywords() {
        let params: HashMap<String, String> = [("$top", "5"), ("$count", "true"), ("tag", "x")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let opts = list_options(params).unwrap();
        assert_eq!(opts.top, Some(5));
        assert!(opts.count);

        let bad: HashMap<String, String> = [("$expand".to_string(), "Manager".to_string())].into_iter().collect();
        assert!(matches!(list_options(bad), Err(AppError::MalformedRequest(_))));
        let nan: HashMap<String, String> = [("$skip".to_string(), "two".to_string())].into_iter().collect();
        assert!(matches!(list_options(nan), Err(AppError::BadRequest(_))));
    }

    #[test]
    fn count_accepts_only_a_filter() {
        let params: HashMap<String, String> = [("$filter", "Age gt 3"), ("tag", "x")]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        assert_eq!(count_filter(params).unwrap().as_deref(), Some("Age gt 3"));
        assert_eq!(count_filter(HashMap::new()).unwrap(), None);

        for key in ["$top", "$skip", "$orderby", "$count", "$expand"] {
            let params: HashMap<String, String> = [(key.to_string(), "1".to_string())].into_iter().collect();
            match count_filter(params) {
                Err(AppError::MalformedRequest(msg)) => assert_eq!(msg, format!("Unknown keyword {}.", key)),
                other => panic!("{}: {:?}", key, other),
            }
        }
    }

    #[test]
    fn record_segments_match_repeatedly() {
        for _ in 0..3 {
            assert_eq!(parse_segment("Team(7)").unwrap().id, Some(7));
            assert_eq!(parse_segment("Team").unwrap().id, None);
        }
        assert_eq!(parse_segment("Team( 8 )").unwrap().id, Some(8));
    }
}
