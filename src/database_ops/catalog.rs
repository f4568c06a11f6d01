use serde_json::Value;
use tracing::{debug, instrument};

use crate::database_ops::db::Db;
use crate::error::RepositoryError;
use crate::models::CatalogResult;

/// Event type the sync workflow always filters on.
pub const NOWCAST_EVENT_TYPE: &str = "nowcast";

/// Bound parameters map onto the procedure's named arguments; a `NULL`
/// argument lets the procedure apply its own default.
const CATALOG_MEMBER_SQL: &str = "SELECT public.get_catalog_member_records(\
     _run_id := $1::text, \
     _project_code := $2::text, \
     _filter_event_type := $3::text, \
     _limit := $4::integer)";

/// Arguments for one catalog procedure call. `None` means "no constraint"
/// and is sent as SQL `NULL`, never as an empty string or zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogQuery {
    pub run_id: Option<String>,
    pub project_code: Option<String>,
    pub filter_event_type: Option<String>,
    pub limit: Option<u32>,
}

impl CatalogQuery {
    pub fn for_run(run_id: impl Into<String>) -> Self {
        Self {
            run_id: Some(run_id.into()),
            ..Self::default()
        }
    }

    pub fn project_code(mut self, code: impl Into<String>) -> Self {
        self.project_code = Some(code.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.filter_event_type = Some(event_type.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Run ID as a `LIKE` pattern so every product of the run matches.
    pub fn run_id_pattern(&self) -> Option<String> {
        self.run_id.as_ref().map(|id| format!("{id}%"))
    }

    pub fn limit_arg(&self) -> Result<Option<i32>, RepositoryError> {
        self.limit
            .map(|l| i32::try_from(l).map_err(|_| RepositoryError::LimitOutOfRange(l)))
            .transpose()
    }
}

/// What the procedure answered, keeping its error sentinel apart from an
/// empty result.
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogFetch {
    /// The procedure rejected the arguments (e.g. no run ID and no limit).
    StoreError { message: String },
    /// Rows (possibly none) matching the query.
    Records(CatalogResult),
}

#[async_trait::async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn fetch(&self, query: &CatalogQuery) -> Result<CatalogFetch, RepositoryError>;
}

/// Postgres-backed repository calling `public.get_catalog_member_records`.
#[derive(Clone)]
pub struct PgCatalogRepository {
    db: Db,
}

impl PgCatalogRepository {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl CatalogRepository for PgCatalogRepository {
    #[instrument(skip(self), fields(run_id = ?query.run_id))]
    async fn fetch(&self, query: &CatalogQuery) -> Result<CatalogFetch, RepositoryError> {
        let limit = query.limit_arg()?;

        let raw: Option<Value> = sqlx::query_scalar(CATALOG_MEMBER_SQL)
            .persistent(false)
            .bind(query.run_id_pattern())
            .bind(query.project_code.as_deref())
            .bind(query.filter_event_type.as_deref())
            .bind(limit)
            .fetch_one(&self.db.pool)
            .await?;

        let fetched = parse_procedure_result(raw)?;
        if let CatalogFetch::Records(result) = &fetched {
            debug!(
                catalogs = result.catalogs().len(),
                past_runs = result.past_runs().len(),
                "catalog procedure returned"
            );
        }
        Ok(fetched)
    }
}

/// Interpret the procedure's JSON.
///
/// - SQL `NULL` or null sections: empty `Records`
/// - an object with an `Error` key: `StoreError`
/// - anything that is not an object, or does not decode: `Malformed`
pub fn parse_procedure_result(raw: Option<Value>) -> Result<CatalogFetch, RepositoryError> {
    let value = match raw {
        None | Some(Value::Null) => return Ok(CatalogFetch::Records(CatalogResult::default())),
        Some(v) => v,
    };

    let Value::Object(map) = &value else {
        return Err(RepositoryError::Malformed(format!(
            "expected a JSON object, got {}",
            json_kind(&value)
        )));
    };

    if let Some(err) = map.get("Error") {
        let message = match err {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        return Ok(CatalogFetch::StoreError { message });
    }

    let result: CatalogResult = serde_json::from_value(value)?;
    Ok(CatalogFetch::Records(result))
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
