use crate::{
    blob::BlobRef,
    error::Result,
    models::{GsmScanRow, NewGsmScan},
    pagination::Page,
    schema::gsm_scans,
};
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

pub(crate) async fn insert(conn: &mut AsyncPgConnection, blob: &BlobRef) -> Result<GsmScanRow> {
    let row = diesel::insert_into(gsm_scans::table)
        .values(NewGsmScan {
            file_name: &blob.name,
            file_path: &blob.path,
        })
        .returning(GsmScanRow::as_returning())
        .get_result(conn)
        .await?;
    Ok(row)
}

pub(crate) async fn find(conn: &mut AsyncPgConnection, id: i64) -> Result<Option<GsmScanRow>> {
    let row = gsm_scans::table
        .find(id)
        .select(GsmScanRow::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(row)
}

/// Same as [`find`] but holds a row lock until the surrounding transaction ends.
pub(crate) async fn lock(conn: &mut AsyncPgConnection, id: i64) -> Result<Option<GsmScanRow>> {
    let row = gsm_scans::table
        .find(id)
        .select(GsmScanRow::as_select())
        .for_update()
        .first(conn)
        .await
        .optional()?;
    Ok(row)
}

pub(crate) async fn replace_file(
    conn: &mut AsyncPgConnection,
    id: i64,
    blob: &BlobRef,
) -> Result<GsmScanRow> {
    let row = diesel::update(gsm_scans::table.find(id))
        .set((
            gsm_scans::file_name.eq(&blob.name),
            gsm_scans::file_path.eq(&blob.path),
            gsm_scans::updated_at.eq(Utc::now()),
        ))
        .returning(GsmScanRow::as_returning())
        .get_result(conn)
        .await?;
    Ok(row)
}

/// Newest scans first.
pub(crate) async fn list(conn: &mut AsyncPgConnection, page: &Page) -> Result<Vec<GsmScanRow>> {
    let rows = gsm_scans::table
        .select(GsmScanRow::as_select())
        .order((gsm_scans::created_at.desc(), gsm_scans::id.desc()))
        .limit(page.limit)
        .offset(page.offset)
        .load(conn)
        .await?;
    Ok(rows)
}
