//! Lowered tag-query execution.
//!
//! The query crate emits the SQL text and the bind values; this module
//! only runs them. Both statements are prepared in one call so the count
//! and the page come from the same connection state.

use super::connection::Database;
use crate::Error;
use tokio_rusqlite::rusqlite::{params_from_iter, types::Value};

impl Database {
    /// Run a lowered tag query: the total match count plus one page of
    /// article ids.
    ///
    /// `binds` are the tag values in placeholder order; `limit`/`offset`
    /// fill the page statement's trailing placeholders.
    pub async fn run_tag_query(
        &self, count_sql: String, page_sql: String, binds: Vec<String>, limit: i64, offset: i64,
    ) -> Result<(u64, Vec<String>), Error> {
        self.conn
            .call(move |conn| -> Result<(u64, Vec<String>), Error> {
                let count: i64 = {
                    let mut stmt = conn.prepare(&count_sql)?;
                    stmt.query_row(params_from_iter(binds.iter()), |row| row.get(0))?
                };

                let mut page_params: Vec<Value> =
                    binds.iter().map(|b| Value::from(b.clone())).collect();
                page_params.push(Value::from(limit));
                page_params.push(Value::from(offset));

                let ids = {
                    let mut stmt = conn.prepare(&page_sql)?;
                    let rows =
                        stmt.query_map(params_from_iter(page_params), |row| row.get::<_, String>(0))?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };

                Ok((count as u64, ids))
            })
            .await
            .map_err(Error::from)
    }
}
