//! Query shapes for index lookups.

use crate::index::Scalar;
use serde::{Deserialize, Serialize};

/// An ordered range over index keys: `low` inclusive, `high` exclusive.
/// A missing bound is unbounded on that side.
///
/// ```
/// use jsondocdb::KeyRange;
///
/// let range = KeyRange::between("id1", "id4").reversed().limit(2);
/// assert!(range.reverse);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KeyRange {
    pub low: Option<Scalar>,
    pub high: Option<Scalar>,
    #[serde(default)]
    pub reverse: bool,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub offset: Option<u64>,
}

impl KeyRange {
    /// Every entry of the index.
    pub fn all() -> Self {
        KeyRange::default()
    }

    pub fn between(low: impl Into<Scalar>, high: impl Into<Scalar>) -> Self {
        KeyRange {
            low: Some(low.into()),
            high: Some(high.into()),
            ..KeyRange::default()
        }
    }

    pub fn at_least(low: impl Into<Scalar>) -> Self {
        KeyRange {
            low: Some(low.into()),
            ..KeyRange::default()
        }
    }

    pub fn below(high: impl Into<Scalar>) -> Self {
        KeyRange {
            high: Some(high.into()),
            ..KeyRange::default()
        }
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    /// The `WHERE` / `ORDER BY` / `LIMIT` tail for a scan over an entries
    /// table whose columns carry `prefix`, with the parameters it binds.
    pub(crate) fn sql_tail(&self, prefix: &str) -> (String, Vec<&Scalar>) {
        let column = format!("{prefix}key");
        let mut clauses = Vec::new();
        let mut params = Vec::new();
        if let Some(low) = &self.low {
            clauses.push(format!("{column} >= ?"));
            params.push(low);
        }
        if let Some(high) = &self.high {
            clauses.push(format!("{column} < ?"));
            params.push(high);
        }

        let mut sql = String::new();
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        let direction = if self.reverse { "DESC" } else { "ASC" };
        sql.push_str(&format!(
            " ORDER BY {column} {direction}, {prefix}identifier {direction}"
        ));

        match (self.limit, self.offset) {
            (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
            (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
            (None, None) => {}
        }
        (sql, params)
    }
}
