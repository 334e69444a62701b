use crate::{
    error::{Result, ServiceError},
    models::{GsmDataRow, GsmDataView, NewGsmData, NewGsmDataScan, NewOperator, OperatorRow},
    schema::{gsm_data, gsm_data_scans, operators},
};
use chrono::Utc;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};
use std::collections::HashMap;
use tracing::{debug, warn};

/// An operator identity together with its aggregate row.
#[derive(Debug, Clone)]
pub struct ResolvedOperator {
    pub operator: OperatorRow,
    pub data: GsmDataRow,
}

/// Outcome of one insert attempt in a get-or-create loop.
enum Insert<T> {
    Created(T),
    Conflict,
}

/// Get-or-create for both the operator identity and its aggregate.
///
/// The unique constraints on `operators.name` and `gsm_data.operator_id` are
/// the only guard against duplicates: a losing concurrent insert retries the
/// lookup and picks up the winner's row.
pub(crate) async fn resolve(
    conn: &mut AsyncPgConnection,
    name: &str,
    attempts: u32,
) -> Result<ResolvedOperator> {
    let operator = resolve_operator(conn, name, attempts).await?;
    let data = resolve_data(conn, operator.id, attempts).await?;
    Ok(ResolvedOperator { operator, data })
}

async fn resolve_operator(
    conn: &mut AsyncPgConnection,
    name: &str,
    attempts: u32,
) -> Result<OperatorRow> {
    for attempt in 1..=attempts {
        let existing = operators::table
            .filter(operators::name.eq(name))
            .select(OperatorRow::as_select())
            .first(conn)
            .await
            .optional()?;
        if let Some(row) = existing {
            return Ok(row);
        }

        let inserted = guarded_insert(conn, move |conn| {
            async move {
                diesel::insert_into(operators::table)
                    .values(NewOperator { name })
                    .on_conflict_do_nothing()
                    .returning(OperatorRow::as_returning())
                    .get_result(conn)
                    .await
                    .optional()
            }
            .scope_boxed()
        })
        .await?;

        match inserted {
            Insert::Created(row) => {
                debug!(operator = name, operator_id = row.id, "created operator");
                return Ok(row);
            }
            Insert::Conflict => {
                debug!(operator = name, attempt, "operator created concurrently; retrying lookup");
            }
        }
    }

    warn!(operator = name, attempts, "operator resolution exhausted its retries");
    Err(ServiceError::persistence(format!(
        "could not resolve operator '{name}' after {attempts} attempts"
    )))
}

async fn resolve_data(
    conn: &mut AsyncPgConnection,
    operator_id: i64,
    attempts: u32,
) -> Result<GsmDataRow> {
    for attempt in 1..=attempts {
        let existing = gsm_data::table
            .filter(gsm_data::operator_id.eq(operator_id))
            .select(GsmDataRow::as_select())
            .first(conn)
            .await
            .optional()?;
        if let Some(row) = existing {
            return Ok(row);
        }

        let inserted = guarded_insert(conn, move |conn| {
            async move {
                diesel::insert_into(gsm_data::table)
                    .values(NewGsmData { operator_id })
                    .on_conflict_do_nothing()
                    .returning(GsmDataRow::as_returning())
                    .get_result(conn)
                    .await
                    .optional()
            }
            .scope_boxed()
        })
        .await?;

        match inserted {
            Insert::Created(row) => {
                debug!(operator_id, gsm_data_id = row.id, "created operator aggregate");
                return Ok(row);
            }
            Insert::Conflict => {
                debug!(operator_id, attempt, "aggregate created concurrently; retrying lookup");
            }
        }
    }

    warn!(operator_id, attempts, "aggregate resolution exhausted its retries");
    Err(ServiceError::persistence(format!(
        "could not resolve aggregate for operator {operator_id} after {attempts} attempts"
    )))
}

/// Runs one insert inside its own (nested) transaction so that a unique
/// violation only rolls back to the savepoint and the caller can retry.
async fn guarded_insert<'a, T, F>(conn: &'a mut AsyncPgConnection, insert: F) -> Result<Insert<T>>
where
    T: Send + 'a,
    F: for<'r> FnOnce(
            &'r mut AsyncPgConnection,
        )
            -> diesel_async::scoped_futures::ScopedBoxFuture<'a, 'r, QueryResult<Option<T>>>
        + Send
        + 'a,
{
    match conn.transaction::<_, DieselError, _>(insert).await {
        Ok(Some(row)) => Ok(Insert::Created(row)),
        Ok(None) => Ok(Insert::Conflict),
        Err(DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _)) => {
            Ok(Insert::Conflict)
        }
        Err(err) => Err(err.into()),
    }
}

/// Appends a scan to an aggregate; linking the same pair twice is a no-op.
pub(crate) async fn link_scan(
    conn: &mut AsyncPgConnection,
    gsm_data_id: i64,
    gsm_scan_id: i64,
) -> Result<()> {
    diesel::insert_into(gsm_data_scans::table)
        .values(NewGsmDataScan {
            gsm_data_id,
            gsm_scan_id,
        })
        .on_conflict_do_nothing()
        .execute(conn)
        .await?;
    diesel::update(gsm_data::table.find(gsm_data_id))
        .set(gsm_data::updated_at.eq(Utc::now()))
        .execute(conn)
        .await?;
    Ok(())
}

/// Aggregates newest first, optionally restricted to one operator name.
pub(crate) async fn list(
    conn: &mut AsyncPgConnection,
    operator: Option<&str>,
) -> Result<Vec<GsmDataView>> {
    let mut query = gsm_data::table
        .inner_join(operators::table)
        .select((GsmDataRow::as_select(), operators::name))
        .order((gsm_data::created_at.desc(), gsm_data::id.desc()))
        .into_boxed();
    if let Some(name) = operator {
        query = query.filter(operators::name.eq(name.to_string()));
    }
    let rows: Vec<(GsmDataRow, String)> = query.load(conn).await?;

    let ids: Vec<i64> = rows.iter().map(|(data, _)| data.id).collect();
    let links: Vec<(i64, i64)> = gsm_data_scans::table
        .filter(gsm_data_scans::gsm_data_id.eq_any(ids))
        .select((gsm_data_scans::gsm_data_id, gsm_data_scans::gsm_scan_id))
        .order((gsm_data_scans::created_at.asc(), gsm_data_scans::gsm_scan_id.asc()))
        .load(conn)
        .await?;

    let mut scans_by_data: HashMap<i64, Vec<i64>> = HashMap::new();
    for (data_id, scan_id) in links {
        scans_by_data.entry(data_id).or_default().push(scan_id);
    }

    Ok(rows
        .into_iter()
        .map(|(data, operator)| GsmDataView {
            pk: data.id,
            gsm_scan: scans_by_data.remove(&data.id).unwrap_or_default(),
            operator,
            created_at: data.created_at,
        })
        .collect())
}
