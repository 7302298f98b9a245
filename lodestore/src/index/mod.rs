//! The secondary, independently-queryable index collaborator.
//!
//! [`IndexStore`] is the contract the synchronization decorators rely on;
//! [`SqliteIndex`] implements it over SQLite. Each context gets its own
//! table with one typed column per declared property (plus a raw-bytes JSON
//! column for faithful element reconstruction) and a secondary SQL index
//! per property. Queries are translated into SQL using the same coercion
//! table as the match compiler, so both sides agree on what stored bytes
//! mean; the one predicate SQL cannot express exactly (substring match on
//! the rounded decimal rendering) is kept as a residual filter applied to
//! the over-selected rows.

use crate::codec::{self, PropKind};
use crate::element::{Element, Prop};
use crate::error::{LodestoreError, Result};
use crate::matcher::{self, ID_FIELD};
use crate::query::Query;
use crate::schema::Schema;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

/// Contract of the external index engine. Implementations own their storage
/// format; callers only see elements and queries.
pub trait IndexStore: Send + Sync {
    /// Create the context's storage and one index per declared property.
    fn prepare(&self, context: &str) -> Result<()>;

    /// Insert or replace one element.
    fn insert(&self, context: &str, element: &Element) -> Result<()>;

    /// Delete every indexed element matching the query.
    fn remove_matching(&self, context: &str, query: &Query) -> Result<()>;

    /// Query the index, paginated, in id order.
    fn find(&self, context: &str, query: &Query, start: usize, amount: usize)
        -> Result<Vec<Element>>;

    /// Whether an element with this id is indexed.
    fn contains(&self, context: &str, id: &str) -> Result<bool>;
}

/// SQLite-backed index engine.
pub struct SqliteIndex {
    conn: Mutex<Connection>,
    schema: Arc<Schema>,
}

impl SqliteIndex {
    /// Open or create the index database at the given path.
    pub fn open(path: &Path, schema: Arc<Schema>) -> Result<Self> {
        Ok(SqliteIndex {
            conn: Mutex::new(Connection::open(path)?),
            schema,
        })
    }

    /// Open an in-memory index (for testing and ephemeral use).
    pub fn open_in_memory(schema: Arc<Schema>) -> Result<Self> {
        Ok(SqliteIndex {
            conn: Mutex::new(Connection::open_in_memory()?),
            schema,
        })
    }

    fn columns(&self, context: &str) -> Result<Vec<(String, PropKind)>> {
        self.schema.context(context)?;
        Ok(self
            .schema
            .prop_names(context)
            .into_iter()
            .filter_map(|name| self.schema.kind_of(context, &name).map(|kind| (name, kind)))
            .collect())
    }

    /// Select matching rows; apply the residual predicate and pagination on
    /// the reconstructed elements when the translation was inexact.
    fn select(
        &self,
        context: &str,
        query: &Query,
        start: usize,
        amount: usize,
    ) -> Result<Vec<Element>> {
        let translated = translate(&self.schema, context, query)?;
        let table = table_name(context);

        let (limit, offset) = if translated.exact {
            (
                if amount == usize::MAX { -1 } else { amount as i64 },
                start as i64,
            )
        } else {
            (-1, 0)
        };

        let conn = self.conn.lock().unwrap();
        let mut sql_params = translated.params;
        let sql = format!(
            "SELECT id, props_json FROM {table} WHERE {} ORDER BY id LIMIT ?{} OFFSET ?{}",
            translated.clause,
            sql_params.len() + 1,
            sql_params.len() + 2,
        );
        let mut stmt = conn.prepare(&sql)?;
        sql_params.push(SqlValue::Integer(limit));
        sql_params.push(SqlValue::Integer(offset));

        let rows = stmt.query_map(rusqlite::params_from_iter(sql_params), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut elements = Vec::new();
        for row in rows {
            let (id, props_json) = row?;
            let props: BTreeMap<String, Vec<u8>> = serde_json::from_str(&props_json)?;
            elements.push(Element::new(
                id,
                props.into_iter().map(|(n, c)| Prop::new(n, c)).collect(),
            ));
        }
        drop(stmt);
        drop(conn);

        if translated.exact {
            return Ok(elements);
        }

        let compiled = matcher::compile(query, &self.schema, context, None)?;
        Ok(elements
            .into_iter()
            .filter(|e| compiled.matches(e))
            .skip(start)
            .take(amount)
            .collect())
    }
}

impl IndexStore for SqliteIndex {
    fn prepare(&self, context: &str) -> Result<()> {
        let columns = self.columns(context)?;
        let table = table_name(context);

        // Sanitization collapses non-alphanumeric characters, so names
        // differing only in those would share an identifier. Reject them
        // here rather than silently merging their columns or tables.
        let mut seen: std::collections::HashMap<String, &str> = std::collections::HashMap::new();
        for (name, _) in &columns {
            if let Some(prior) = seen.insert(column_name(name), name.as_str()) {
                return Err(LodestoreError::Schema(format!(
                    "properties '{prior}' and '{name}' in context '{context}' collide on index column '{}'",
                    column_name(name)
                )));
            }
        }
        for other in self.schema.definition().contexts.keys() {
            if other != context && table_name(other) == table {
                return Err(LodestoreError::Schema(format!(
                    "contexts '{other}' and '{context}' collide on index table '{table}'"
                )));
            }
        }

        let mut ddl = format!("CREATE TABLE IF NOT EXISTS {table} (id TEXT PRIMARY KEY");
        for (name, kind) in &columns {
            ddl.push_str(&format!(", {} {}", column_name(name), sql_type(*kind)));
        }
        ddl.push_str(", props_json TEXT NOT NULL);");

        let conn = self.conn.lock().unwrap();
        conn.execute_batch(&ddl)?;
        for (name, _) in &columns {
            let column = column_name(name);
            conn.execute_batch(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_{column} ON {table}({column});"
            ))?;
        }
        Ok(())
    }

    fn insert(&self, context: &str, element: &Element) -> Result<()> {
        let columns = self.columns(context)?;
        let table = table_name(context);

        let mut names = vec!["id".to_string()];
        let mut values: Vec<SqlValue> = vec![SqlValue::Text(element.id().to_string())];
        for (name, kind) in &columns {
            names.push(column_name(name));
            values.push(match element.prop(name) {
                Some(bytes) => typed_value(*kind, bytes),
                None => SqlValue::Null,
            });
        }
        names.push("props_json".to_string());
        let props: BTreeMap<String, Vec<u8>> = element
            .props()
            .map(|p| (p.name, p.content))
            .collect();
        values.push(SqlValue::Text(serde_json::to_string(&props)?));

        let placeholders: Vec<String> = (1..=values.len()).map(|i| format!("?{i}")).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {table} ({}) VALUES ({})",
            names.join(", "),
            placeholders.join(", ")
        );
        self.conn
            .lock()
            .unwrap()
            .execute(&sql, rusqlite::params_from_iter(values))?;
        Ok(())
    }

    fn remove_matching(&self, context: &str, query: &Query) -> Result<()> {
        // Resolve ids first so residual predicates delete exactly the
        // elements the match compiler would have matched.
        let matched = self.select(context, query, 0, usize::MAX)?;
        if matched.is_empty() {
            return Ok(());
        }
        let table = table_name(context);
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!("DELETE FROM {table} WHERE id = ?1"))?;
        for element in matched {
            stmt.execute(params![element.id()])?;
        }
        Ok(())
    }

    fn find(
        &self,
        context: &str,
        query: &Query,
        start: usize,
        amount: usize,
    ) -> Result<Vec<Element>> {
        self.select(context, query, start, amount)
    }

    fn contains(&self, context: &str, id: &str) -> Result<bool> {
        let table = table_name(context);
        let found: Option<i64> = self
            .conn
            .lock()
            .unwrap()
            .query_row(
                &format!("SELECT 1 FROM {table} WHERE id = ?1"),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

// ── Naming and typing ────────────────────────────────────────────

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

fn table_name(context: &str) -> String {
    format!("els_{}", sanitize(context))
}

fn column_name(prop: &str) -> String {
    format!("p_{}", sanitize(prop))
}

fn sql_type(kind: PropKind) -> &'static str {
    match kind {
        PropKind::Integer | PropKind::Date | PropKind::Switch => "INTEGER",
        PropKind::Decimal => "REAL",
        PropKind::Text | PropKind::Options | PropKind::Complex => "TEXT",
    }
}

/// Decode property bytes into the SQL value the typed column holds.
/// Undecodable bytes index as NULL and therefore never match positively.
fn typed_value(kind: PropKind, bytes: &[u8]) -> SqlValue {
    match kind {
        PropKind::Integer => codec::decode_i64(bytes)
            .map(SqlValue::Integer)
            .unwrap_or(SqlValue::Null),
        PropKind::Date => codec::decode_ticks(bytes)
            .map(SqlValue::Integer)
            .unwrap_or(SqlValue::Null),
        PropKind::Switch => SqlValue::Integer(i64::from(codec::decode_switch(bytes))),
        PropKind::Decimal => codec::decode_f64(bytes)
            .map(SqlValue::Real)
            .unwrap_or(SqlValue::Null),
        PropKind::Text | PropKind::Options | PropKind::Complex => {
            SqlValue::Text(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

// ── Query translation ────────────────────────────────────────────

/// A translated query: a SQL boolean expression over the context's table,
/// its bound parameters, and whether the translation is exact. An inexact
/// clause over-selects and the caller re-verifies with the match compiler.
pub struct Translated {
    pub clause: String,
    pub params: Vec<SqlValue>,
    pub exact: bool,
}

const MATCH_NONE: &str = "0=1";
const MATCH_ALL: &str = "1=1";

/// Translate a query into the index's native SQL form. The field kinds and
/// value coercions are the same ones the match compiler uses.
pub fn translate(schema: &Schema, context: &str, query: &Query) -> Result<Translated> {
    schema.context(context)?;
    let mut params = Vec::new();
    let mut exact = true;
    let clause = clause_for(schema, context, query, &mut params, &mut exact);
    Ok(Translated { clause, params, exact })
}

fn clause_for(
    schema: &Schema,
    context: &str,
    query: &Query,
    params: &mut Vec<SqlValue>,
    exact: &mut bool,
) -> String {
    match query {
        Query::All => MATCH_ALL.to_string(),
        Query::None => MATCH_NONE.to_string(),
        Query::And(children) | Query::Or(children) => {
            let joiner = if matches!(query, Query::And(_)) { " AND " } else { " OR " };
            let parts: Vec<String> = children
                .iter()
                .map(|c| clause_for(schema, context, c, params, exact))
                .collect();
            format!("({})", parts.join(joiner))
        }
        Query::Not { field, value } => match resolve(schema, context, field) {
            Some((column, kind)) => match eq_param(kind, value) {
                Some(param) => {
                    params.push(param);
                    format!("({column} IS NULL OR {column} <> ?{})", params.len())
                }
                // EQ can never match, so its negation always does.
                None => MATCH_ALL.to_string(),
            },
            None => MATCH_ALL.to_string(),
        },
        Query::Eq { field, value } => positive(schema, context, field, |column, kind| {
            match eq_param(kind, value) {
                Some(param) => {
                    params.push(param);
                    format!("{column} = ?{}", params.len())
                }
                None => MATCH_NONE.to_string(),
            }
        }),
        Query::Gt { field, value }
        | Query::Gte { field, value }
        | Query::Lt { field, value }
        | Query::Lte { field, value } => positive(schema, context, field, |column, kind| {
            ordering_clause(query.kind(), column, kind, value, params)
        }),
        Query::Contains { field, value } => positive(schema, context, field, |column, kind| {
            contains_clause(column, kind, value, params, exact)
        }),
        Query::In { field, values } => positive(schema, context, field, |column, kind| {
            let members: Vec<SqlValue> =
                values.iter().filter_map(|v| eq_param(kind, v)).collect();
            if members.is_empty() {
                return MATCH_NONE.to_string();
            }
            let mut placeholders = Vec::new();
            for member in members {
                params.push(member);
                placeholders.push(format!("?{}", params.len()));
            }
            format!("{column} IN ({})", placeholders.join(", "))
        }),
    }
}

/// Resolve a field to its column and kind. The reserved id field maps to
/// the primary-key column with text semantics.
fn resolve(schema: &Schema, context: &str, field: &str) -> Option<(String, PropKind)> {
    if field == ID_FIELD {
        return Some(("id".to_string(), PropKind::Text));
    }
    schema
        .kind_of(context, field)
        .map(|kind| (column_name(field), kind))
}

/// Unknown fields make every positive operator a no-match.
fn positive(
    schema: &Schema,
    context: &str,
    field: &str,
    build: impl FnOnce(String, PropKind) -> String,
) -> String {
    match resolve(schema, context, field) {
        Some((column, kind)) => build(column, kind),
        None => MATCH_NONE.to_string(),
    }
}

/// The SQL parameter an EQ comparison binds, or None when the value cannot
/// be coerced to the kind (and the comparison can never match).
fn eq_param(kind: PropKind, value: &str) -> Option<SqlValue> {
    match kind {
        PropKind::Integer => value.trim().parse::<i64>().ok().map(SqlValue::Integer),
        PropKind::Date => value.trim().parse::<i64>().ok().map(SqlValue::Integer),
        PropKind::Decimal => value.trim().parse::<f64>().ok().map(SqlValue::Real),
        PropKind::Switch => match value.trim().to_ascii_lowercase().as_str() {
            "true" => Some(SqlValue::Integer(1)),
            "false" => Some(SqlValue::Integer(0)),
            _ => None,
        },
        PropKind::Text | PropKind::Options | PropKind::Complex => {
            Some(SqlValue::Text(value.to_string()))
        }
    }
}

fn ordering_clause(
    op: &str,
    column: String,
    kind: PropKind,
    value: &str,
    params: &mut Vec<SqlValue>,
) -> String {
    if kind == PropKind::Switch {
        return switch_ordering_clause(op, column, value);
    }
    let Some(param) = eq_param(kind, value) else {
        return MATCH_NONE.to_string();
    };
    let sql_op = match op {
        "GT" => ">",
        "GTE" => ">=",
        "LT" => "<",
        _ => "<=",
    };
    params.push(param);
    format!("{column} {sql_op} ?{}", params.len())
}

/// Boolean ordering: true is greater. GTE and LTE admit equal values; GT is
/// never meaningful and never matches; LT is the strict complement of GTE.
fn switch_ordering_clause(op: &str, column: String, value: &str) -> String {
    let want = match value.trim().to_ascii_lowercase().as_str() {
        "true" => true,
        "false" => false,
        _ => return MATCH_NONE.to_string(),
    };
    match (op, want) {
        ("GTE", true) => format!("{column} = 1"),
        ("GTE", false) => format!("{column} IS NOT NULL"),
        ("LT", true) => format!("{column} = 0"),
        ("LT", false) => MATCH_NONE.to_string(),
        ("LTE", true) => format!("{column} IS NOT NULL"),
        ("LTE", false) => format!("{column} = 0"),
        _ => MATCH_NONE.to_string(),
    }
}

fn contains_clause(
    column: String,
    kind: PropKind,
    value: &str,
    params: &mut Vec<SqlValue>,
    exact: &mut bool,
) -> String {
    match kind {
        // Substring match is not defined for dates.
        PropKind::Date => MATCH_NONE.to_string(),
        PropKind::Integer => {
            params.push(SqlValue::Text(value.to_string()));
            format!("instr(CAST({column} AS TEXT), ?{}) > 0", params.len())
        }
        PropKind::Decimal => {
            // SQL cannot reproduce the rounded decimal rendering; keep a
            // superset and let the caller re-verify.
            *exact = false;
            format!("{column} IS NOT NULL")
        }
        PropKind::Switch => {
            let in_true = "true".contains(value);
            let in_false = "false".contains(value);
            match (in_true, in_false) {
                (true, true) => format!("{column} IS NOT NULL"),
                (true, false) => format!("{column} = 1"),
                (false, true) => format!("{column} = 0"),
                (false, false) => MATCH_NONE.to_string(),
            }
        }
        // instr is byte-wise, so the comparison stays case-sensitive the
        // way the compiled predicate's substring containment is; LIKE
        // would fold ASCII case.
        PropKind::Text | PropKind::Options | PropKind::Complex => {
            params.push(SqlValue::Text(value.to_string()));
            format!("instr({column}, ?{}) > 0", params.len())
        }
    }
}
