//! SQLite implementation of IResourceStore
//!
//! One row per document. Scoping fields are columns so the match and
//! staleness queries can filter in SQL; link sets and kind-specific
//! properties are stored as JSON text.
//!
//! ## Type Mapping
//!
//! | Domain Type         | SQL Type | Strategy                                  |
//! |---------------------|----------|-------------------------------------------|
//! | SelfLink            | TEXT     | `.as_str()` / `SelfLink::new()`           |
//! | ResourceKind        | TEXT     | `.as_str()` / `FromStr`                   |
//! | BTreeSet<SelfLink>  | TEXT     | serde_json array                          |
//! | properties          | TEXT     | serde_json object                         |
//! | DateTime<Utc>       | INTEGER  | microseconds since the Unix epoch         |
//!
//! ## Pagination
//!
//! `query_page` is keyset-paginated on `self_link`. The page link is the
//! base64 of the last self link returned, so deleting rows between pages
//! never shifts the window.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, SubsecRound, Utc};
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Row, Sqlite, SqlitePool};

use cloudmirror_core::domain::{LocalResourceState, ResourceKind, SelfLink};
use cloudmirror_core::ports::{IResourceStore, QueryPage, ResourceQuery, StoreError};

use crate::CacheError;

/// Optimistic-concurrency attempts for a patch before giving up
const MAX_PATCH_ATTEMPTS: usize = 3;

/// SQLite-based implementation of the resource store port
pub struct SqliteResourceStore {
    pool: SqlitePool,
}

impl SqliteResourceStore {
    /// Creates a new store with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch_row(&self, self_link: &SelfLink) -> Result<Option<StoredRow>, CacheError> {
        let row = sqlx::query("SELECT * FROM resources WHERE self_link = ?")
            .bind(self_link.as_str())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_stored).transpose()
    }
}

// ============================================================================
// Helper functions for type conversion
// ============================================================================

/// A document plus the version column used for optimistic updates
struct StoredRow {
    state: LocalResourceState,
    version: i64,
}

/// Current time at the precision the table stores
fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

fn to_micros(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_micros()
}

fn from_micros(micros: i64) -> Result<DateTime<Utc>, CacheError> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        CacheError::SerializationError(format!("Timestamp out of range: {}", micros))
    })
}

fn links_to_json(links: &BTreeSet<SelfLink>) -> Result<String, CacheError> {
    Ok(serde_json::to_string(links)?)
}

fn links_from_json(raw: &str) -> Result<BTreeSet<SelfLink>, CacheError> {
    Ok(serde_json::from_str(raw)?)
}

fn optional_link(raw: Option<String>) -> Result<Option<SelfLink>, CacheError> {
    raw.map(|s| SelfLink::new(s).map_err(|e| CacheError::SerializationError(e.to_string())))
        .transpose()
}

fn row_to_stored(row: &SqliteRow) -> Result<StoredRow, CacheError> {
    let self_link: String = row.try_get("self_link")?;
    let kind: String = row.try_get("kind")?;
    let tenant_links: String = row.try_get("tenant_links")?;
    let group_links: String = row.try_get("group_links")?;
    let tag_links: String = row.try_get("tag_links")?;
    let properties: String = row.try_get("properties")?;

    let state = LocalResourceState {
        id: row.try_get("id")?,
        kind: ResourceKind::from_str(&kind)
            .map_err(|e| CacheError::SerializationError(e.to_string()))?,
        self_link: optional_link(Some(self_link))?,
        name: row.try_get("name")?,
        endpoint_link: optional_link(row.try_get("endpoint_link")?)?,
        tenant_links: links_from_json(&tenant_links)?,
        resource_pool_link: optional_link(row.try_get("resource_pool_link")?)?,
        parent_link: optional_link(row.try_get("parent_link")?)?,
        group_links: links_from_json(&group_links)?,
        tag_links: links_from_json(&tag_links)?,
        last_updated_at: Some(from_micros(row.try_get("last_updated_at")?)?),
        properties: serde_json::from_str(&properties)?,
    };
    Ok(StoredRow {
        state,
        version: row.try_get("document_version")?,
    })
}

fn encode_page_link(last_self_link: &SelfLink) -> String {
    URL_SAFE_NO_PAD.encode(last_self_link.as_str())
}

fn decode_page_link(page_link: &str) -> Result<String, CacheError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(page_link)
        .map_err(|e| CacheError::SerializationError(format!("Invalid page link: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| CacheError::SerializationError(format!("Invalid page link: {}", e)))
}

/// Maps an insert failure, classifying unique violations
fn classify_insert_error(err: sqlx::Error, self_link: &SelfLink) -> anyhow::Error {
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::AlreadyExists(self_link.to_string()).into()
        }
        _ => anyhow::Error::from(CacheError::from(err))
            .context(format!("Failed to create {}", self_link)),
    }
}

// ============================================================================
// Query building
// ============================================================================

enum BindValue {
    Text(String),
    Integer(i64),
}

/// WHERE clause built from a [`ResourceQuery`]
struct SqlFilter {
    clauses: Vec<String>,
    binds: Vec<BindValue>,
}

impl SqlFilter {
    fn from_query(query: &ResourceQuery) -> Self {
        let mut filter = Self {
            clauses: vec!["kind = ?".to_string()],
            binds: vec![BindValue::Text(query.kind.as_str().to_string())],
        };

        if let Some(endpoint) = &query.endpoint_link {
            filter.push("endpoint_link = ?", endpoint.as_str());
        }
        if let Some(pool) = &query.resource_pool_link {
            filter.push("resource_pool_link = ?", pool.as_str());
        }
        if let Some(parent) = &query.parent_link {
            filter.push("parent_link = ?", parent.as_str());
        }
        if !query.tenant_links.is_empty() {
            filter.clauses.push(format!(
                "EXISTS (SELECT 1 FROM json_each(resources.tenant_links) WHERE json_each.value IN ({}))",
                placeholders(query.tenant_links.len())
            ));
            filter.binds.extend(
                query
                    .tenant_links
                    .iter()
                    .map(|t| BindValue::Text(t.as_str().to_string())),
            );
        }
        if let Some(cutoff) = query.updated_before {
            filter.clauses.push("last_updated_at < ?".to_string());
            filter.binds.push(BindValue::Integer(to_micros(cutoff)));
        }
        filter
    }

    fn push(&mut self, clause: &str, value: &str) {
        self.clauses.push(clause.to_string());
        self.binds.push(BindValue::Text(value.to_string()));
    }

    fn push_in(&mut self, column: &str, values: &[String]) {
        self.clauses
            .push(format!("{} IN ({})", column, placeholders(values.len())));
        self.binds
            .extend(values.iter().map(|v| BindValue::Text(v.clone())));
    }

    fn where_sql(&self) -> String {
        self.clauses.join(" AND ")
    }

    fn bind<'q>(
        &'q self,
        mut query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    ) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
        for value in &self.binds {
            query = match value {
                BindValue::Text(text) => query.bind(text.as_str()),
                BindValue::Integer(int) => query.bind(*int),
            };
        }
        query
    }
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

// ============================================================================
// IResourceStore implementation
// ============================================================================

#[async_trait::async_trait]
impl IResourceStore for SqliteResourceStore {
    async fn get(&self, self_link: &SelfLink) -> anyhow::Result<Option<LocalResourceState>> {
        Ok(self.fetch_row(self_link).await?.map(|stored| stored.state))
    }

    async fn get_by_ids(
        &self,
        scope: &ResourceQuery,
        ids: &[String],
    ) -> anyhow::Result<HashMap<String, LocalResourceState>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut filter = SqlFilter::from_query(scope);
        filter.push_in("id", ids);
        let sql = format!(
            "SELECT * FROM resources WHERE {} ORDER BY self_link LIMIT ?",
            filter.where_sql()
        );
        let rows = filter
            .bind(sqlx::query(&sql))
            .bind(scope.limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(CacheError::from)?;

        let mut matched = HashMap::with_capacity(rows.len());
        for row in &rows {
            let stored = row_to_stored(row)?;
            matched.insert(stored.state.id.clone(), stored.state);
        }
        Ok(matched)
    }

    async fn create(&self, state: &LocalResourceState) -> anyhow::Result<LocalResourceState> {
        let mut stored = state.clone();
        let self_link = stored
            .self_link
            .get_or_insert_with(|| SelfLink::generate(state.kind))
            .clone();
        let now = now();
        stored.last_updated_at = Some(now);

        sqlx::query(
            "INSERT INTO resources (self_link, kind, id, name, endpoint_link, resource_pool_link, \
             parent_link, tenant_links, group_links, tag_links, properties, last_updated_at, \
             document_version) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)",
        )
        .bind(self_link.as_str())
        .bind(stored.kind.as_str())
        .bind(&stored.id)
        .bind(&stored.name)
        .bind(stored.endpoint_link.as_ref().map(SelfLink::as_str))
        .bind(stored.resource_pool_link.as_ref().map(SelfLink::as_str))
        .bind(stored.parent_link.as_ref().map(SelfLink::as_str))
        .bind(links_to_json(&stored.tenant_links)?)
        .bind(links_to_json(&stored.group_links)?)
        .bind(links_to_json(&stored.tag_links)?)
        .bind(serde_json::to_string(&stored.properties)?)
        .bind(to_micros(now))
        .execute(&self.pool)
        .await
        .map_err(|e| classify_insert_error(e, &self_link))?;

        tracing::trace!(link = %self_link, kind = %stored.kind.as_str(), "Created document");
        Ok(stored)
    }

    async fn patch(
        &self,
        self_link: &SelfLink,
        partial: &LocalResourceState,
    ) -> anyhow::Result<LocalResourceState> {
        for _ in 0..MAX_PATCH_ATTEMPTS {
            let Some(StoredRow { mut state, version }) = self.fetch_row(self_link).await? else {
                return Err(StoreError::NotFound(self_link.to_string()).into());
            };

            state.merge_patch(partial);
            let now = now();
            state.last_updated_at = Some(now);

            let result = sqlx::query(
                "UPDATE resources SET name = ?, endpoint_link = ?, resource_pool_link = ?, \
                 parent_link = ?, tenant_links = ?, group_links = ?, tag_links = ?, \
                 properties = ?, last_updated_at = ?, document_version = document_version + 1 \
                 WHERE self_link = ? AND document_version = ?",
            )
            .bind(&state.name)
            .bind(state.endpoint_link.as_ref().map(SelfLink::as_str))
            .bind(state.resource_pool_link.as_ref().map(SelfLink::as_str))
            .bind(state.parent_link.as_ref().map(SelfLink::as_str))
            .bind(links_to_json(&state.tenant_links)?)
            .bind(links_to_json(&state.group_links)?)
            .bind(links_to_json(&state.tag_links)?)
            .bind(serde_json::to_string(&state.properties)?)
            .bind(to_micros(now))
            .bind(self_link.as_str())
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(CacheError::from)?;

            if result.rows_affected() == 1 {
                return Ok(state);
            }
            tracing::debug!(link = %self_link, version, "Concurrent patch detected, retrying");
        }

        Err(StoreError::Backend(format!(
            "Gave up patching {} after {} concurrent modifications",
            self_link, MAX_PATCH_ATTEMPTS
        ))
        .into())
    }

    async fn delete(&self, self_link: &SelfLink) -> anyhow::Result<()> {
        let result = sqlx::query("DELETE FROM resources WHERE self_link = ?")
            .bind(self_link.as_str())
            .execute(&self.pool)
            .await
            .map_err(CacheError::from)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(self_link.to_string()).into());
        }
        Ok(())
    }

    async fn query_page(
        &self,
        query: &ResourceQuery,
        page_link: Option<&str>,
    ) -> anyhow::Result<QueryPage> {
        let mut filter = SqlFilter::from_query(query);
        if let Some(link) = page_link {
            let after = decode_page_link(link)?;
            filter.push("self_link > ?", &after);
        }
        let sql = format!(
            "SELECT * FROM resources WHERE {} ORDER BY self_link LIMIT ?",
            filter.where_sql()
        );
        // One extra row tells whether another page exists
        let rows = filter
            .bind(sqlx::query(&sql))
            .bind(query.limit as i64 + 1)
            .fetch_all(&self.pool)
            .await
            .map_err(CacheError::from)?;

        let has_more = rows.len() > query.limit;
        let mut documents = Vec::with_capacity(rows.len().min(query.limit));
        for row in rows.iter().take(query.limit) {
            documents.push(row_to_stored(row)?.state);
        }

        let next_page_link = if has_more {
            documents
                .last()
                .and_then(|doc| doc.self_link.as_ref())
                .map(encode_page_link)
        } else {
            None
        };

        Ok(QueryPage {
            documents,
            next_page_link,
        })
    }
}
