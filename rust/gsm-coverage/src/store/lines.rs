use crate::{
    error::{Result, ServiceError},
    models::{CsvLineChangeset, CsvLinePatch, CsvLineRow, NewCsvLine},
    schema::csv_lines,
    table::{ScanTable, BAND_MAX_LEN, MCCMNC_MAX_LEN, RAT_MAX_LEN},
};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use std::collections::HashMap;

/// Rows per INSERT statement; keeps the bind count well under the Postgres limit.
const INSERT_CHUNK: usize = 1_000;

/// Inserts one line per table row, in file order.
pub(crate) async fn insert_all(
    conn: &mut AsyncPgConnection,
    scan_id: i64,
    table: &ScanTable,
) -> Result<Vec<CsvLineRow>> {
    let mut inserted = Vec::with_capacity(table.len());
    for chunk in table.rows.chunks(INSERT_CHUNK) {
        let values: Vec<NewCsvLine<'_>> = chunk
            .iter()
            .map(|measurement| NewCsvLine::owned_by(scan_id, measurement))
            .collect();
        let mut rows: Vec<CsvLineRow> = diesel::insert_into(csv_lines::table)
            .values(&values)
            .returning(CsvLineRow::as_returning())
            .get_results(conn)
            .await?;
        inserted.append(&mut rows);
    }
    inserted.sort_by_key(|row| row.id);
    Ok(inserted)
}

pub(crate) async fn delete_for_scan(conn: &mut AsyncPgConnection, scan_id: i64) -> Result<usize> {
    let removed = diesel::delete(csv_lines::table.filter(csv_lines::scan_id.eq(scan_id)))
        .execute(conn)
        .await?;
    Ok(removed)
}

pub(crate) async fn for_scan(conn: &mut AsyncPgConnection, scan_id: i64) -> Result<Vec<CsvLineRow>> {
    let rows = csv_lines::table
        .filter(csv_lines::scan_id.eq(scan_id))
        .select(CsvLineRow::as_select())
        .order(csv_lines::id.asc())
        .load(conn)
        .await?;
    Ok(rows)
}

/// Lines grouped by owning scan, each group ordered by id.
pub(crate) async fn for_scans(
    conn: &mut AsyncPgConnection,
    scan_ids: Vec<i64>,
) -> Result<HashMap<i64, Vec<CsvLineRow>>> {
    if scan_ids.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<CsvLineRow> = csv_lines::table
        .filter(csv_lines::scan_id.eq_any(scan_ids))
        .select(CsvLineRow::as_select())
        .order(csv_lines::id.asc())
        .load(conn)
        .await?;

    let mut grouped: HashMap<i64, Vec<CsvLineRow>> = HashMap::new();
    for row in rows {
        grouped.entry(row.scan_id).or_default().push(row);
    }
    Ok(grouped)
}

pub(crate) async fn update(
    conn: &mut AsyncPgConnection,
    id: i64,
    patch: CsvLinePatch,
) -> Result<CsvLineRow> {
    let changes = changeset(patch, Utc::now())?;
    diesel::update(csv_lines::table.find(id))
        .set(&changes)
        .returning(CsvLineRow::as_returning())
        .get_result(conn)
        .await
        .optional()?
        .ok_or_else(|| ServiceError::NotFound(format!("csv line {id}")))
}

fn changeset(patch: CsvLinePatch, now: DateTime<Utc>) -> Result<CsvLineChangeset> {
    Ok(CsvLineChangeset {
        time: patch.time,
        lat: patch.lat,
        lon: patch.lon,
        alt: patch.alt,
        gps_fix: required("gps_fix", patch.gps_fix)?
            .map(|value| non_negative("gps_fix", value))
            .transpose()?,
        rat: required("rat", patch.rat)?
            .map(|value| bounded_text("rat", value, RAT_MAX_LEN))
            .transpose()?,
        mccmnc: required("mccmnc", patch.mccmnc)?
            .map(|value| bounded_text("mccmnc", value, MCCMNC_MAX_LEN))
            .transpose()?,
        cell_id: patch.cell_id,
        pci: nullable_non_negative("pci", patch.pci)?,
        band: required("band", patch.band)?
            .map(|value| bounded_text("band", value, BAND_MAX_LEN))
            .transpose()?,
        earfcn: nullable_non_negative("earfcn", patch.earfcn)?,
        rsrp_dbm: patch.rsrp_dbm,
        rsrq_db: patch.rsrq_db,
        sinr_db: patch.sinr_db,
        updated_at: now,
    })
}

fn required<T>(field: &str, value: Option<Option<T>>) -> Result<Option<T>> {
    match value {
        None => Ok(None),
        Some(Some(value)) => Ok(Some(value)),
        Some(None) => Err(ServiceError::InvalidRequest(format!(
            "{field} may not be null"
        ))),
    }
}

fn non_negative<T>(field: &str, value: T) -> Result<T>
where
    T: PartialOrd + Default + Copy,
{
    if value < T::default() {
        Err(ServiceError::InvalidRequest(format!(
            "{field} must not be negative"
        )))
    } else {
        Ok(value)
    }
}

fn nullable_non_negative<T>(field: &str, value: Option<Option<T>>) -> Result<Option<Option<T>>>
where
    T: PartialOrd + Default + Copy,
{
    match value {
        Some(Some(inner)) => Ok(Some(Some(non_negative(field, inner)?))),
        other => Ok(other),
    }
}

fn bounded_text(field: &str, value: String, max_len: usize) -> Result<String> {
    let value = value.trim().to_string();
    if value.is_empty() {
        return Err(ServiceError::InvalidRequest(format!(
            "{field} may not be blank"
        )));
    }
    if value.chars().count() > max_len {
        return Err(ServiceError::InvalidRequest(format!(
            "{field} is longer than {max_len} characters"
        )));
    }
    Ok(value)
}
