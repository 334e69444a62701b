//! Data models for the coverage tables and their JSON representations.

use crate::schema::{csv_lines, gsm_data, gsm_data_scans, gsm_scans, operators};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = operators, check_for_backend(diesel::pg::Pg))]
pub struct OperatorRow {
    pub id: i64,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = operators)]
pub struct NewOperator<'a> {
    pub name: &'a str,
}

/// Per-operator aggregate row; scans are linked through `gsm_data_scans`.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = gsm_data, check_for_backend(diesel::pg::Pg))]
pub struct GsmDataRow {
    pub id: i64,
    pub operator_id: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = gsm_data)]
pub struct NewGsmData {
    pub operator_id: i64,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = gsm_data_scans)]
pub struct NewGsmDataScan {
    pub gsm_data_id: i64,
    pub gsm_scan_id: i64,
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = gsm_scans, check_for_backend(diesel::pg::Pg))]
pub struct GsmScanRow {
    pub id: i64,
    pub file_name: String,
    pub file_path: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = gsm_scans)]
pub struct NewGsmScan<'a> {
    pub file_name: &'a str,
    pub file_path: &'a str,
}

#[derive(Debug, Clone, PartialEq, Queryable, Selectable)]
#[diesel(table_name = csv_lines, check_for_backend(diesel::pg::Pg))]
pub struct CsvLineRow {
    pub id: i64,
    pub scan_id: i64,
    pub time: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
    pub gps_fix: i16,
    pub rat: String,
    pub mccmnc: String,
    pub cell_id: Option<i64>,
    pub pci: Option<i16>,
    pub band: String,
    pub earfcn: Option<i32>,
    pub rsrp_dbm: Option<i32>,
    pub rsrq_db: Option<f64>,
    pub sinr_db: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One measurement as parsed from an uploaded CSV row, before it is owned by a scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub time: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
    pub gps_fix: i16,
    pub rat: String,
    pub mccmnc: String,
    pub cell_id: Option<i64>,
    pub pci: Option<i16>,
    pub band: String,
    pub earfcn: Option<i32>,
    pub rsrp_dbm: Option<i32>,
    pub rsrq_db: Option<f64>,
    pub sinr_db: Option<f64>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = csv_lines)]
pub struct NewCsvLine<'a> {
    pub scan_id: i64,
    pub time: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
    pub gps_fix: i16,
    pub rat: &'a str,
    pub mccmnc: &'a str,
    pub cell_id: Option<i64>,
    pub pci: Option<i16>,
    pub band: &'a str,
    pub earfcn: Option<i32>,
    pub rsrp_dbm: Option<i32>,
    pub rsrq_db: Option<f64>,
    pub sinr_db: Option<f64>,
}

impl<'a> NewCsvLine<'a> {
    pub fn owned_by(scan_id: i64, m: &'a Measurement) -> Self {
        Self {
            scan_id,
            time: m.time,
            lat: m.lat,
            lon: m.lon,
            alt: m.alt,
            gps_fix: m.gps_fix,
            rat: &m.rat,
            mccmnc: &m.mccmnc,
            cell_id: m.cell_id,
            pci: m.pci,
            band: &m.band,
            earfcn: m.earfcn,
            rsrp_dbm: m.rsrp_dbm,
            rsrq_db: m.rsrq_db,
            sinr_db: m.sinr_db,
        }
    }
}

/// Partial update of a stored line. Outer `None` leaves a column untouched,
/// `Some(None)` clears a nullable column.
#[derive(Debug, Default, Deserialize)]
pub struct CsvLinePatch {
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub time: Option<Option<DateTime<Utc>>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub lat: Option<Option<f64>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub lon: Option<Option<f64>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub alt: Option<Option<f64>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub gps_fix: Option<Option<i16>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub rat: Option<Option<String>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub mccmnc: Option<Option<String>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub cell_id: Option<Option<i64>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub pci: Option<Option<i16>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub band: Option<Option<String>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub earfcn: Option<Option<i32>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub rsrp_dbm: Option<Option<i32>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub rsrq_db: Option<Option<f64>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub sinr_db: Option<Option<f64>>,
}

#[derive(Debug, AsChangeset)]
#[diesel(table_name = csv_lines)]
pub struct CsvLineChangeset {
    pub time: Option<Option<DateTime<Utc>>>,
    pub lat: Option<Option<f64>>,
    pub lon: Option<Option<f64>>,
    pub alt: Option<Option<f64>>,
    pub gps_fix: Option<i16>,
    pub rat: Option<String>,
    pub mccmnc: Option<String>,
    pub cell_id: Option<Option<i64>>,
    pub pci: Option<Option<i16>>,
    pub band: Option<String>,
    pub earfcn: Option<Option<i32>>,
    pub rsrp_dbm: Option<Option<i32>>,
    pub rsrq_db: Option<Option<f64>>,
    pub sinr_db: Option<Option<f64>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CsvLineView {
    pub pk: i64,
    pub time: Option<DateTime<Utc>>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub alt: Option<f64>,
    pub gps_fix: i16,
    pub rat: String,
    pub mccmnc: String,
    pub cell_id: Option<i64>,
    pub pci: Option<i16>,
    pub band: String,
    pub earfcn: Option<i32>,
    pub rsrp_dbm: Option<i32>,
    pub rsrq_db: Option<f64>,
    pub sinr_db: Option<f64>,
}

impl From<CsvLineRow> for CsvLineView {
    fn from(row: CsvLineRow) -> Self {
        Self {
            pk: row.id,
            time: row.time,
            lat: row.lat,
            lon: row.lon,
            alt: row.alt,
            gps_fix: row.gps_fix,
            rat: row.rat,
            mccmnc: row.mccmnc,
            cell_id: row.cell_id,
            pci: row.pci,
            band: row.band,
            earfcn: row.earfcn,
            rsrp_dbm: row.rsrp_dbm,
            rsrq_db: row.rsrq_db,
            sinr_db: row.sinr_db,
        }
    }
}

/// A scan together with the lines it owns, as returned by the API.
#[derive(Debug, Clone, Serialize)]
pub struct GsmScanView {
    pub pk: i64,
    pub file: String,
    pub file_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub csv_lines: Vec<CsvLineView>,
}

impl GsmScanView {
    pub fn new(scan: GsmScanRow, lines: Vec<CsvLineRow>) -> Self {
        Self {
            pk: scan.id,
            file: scan.file_path,
            file_name: scan.file_name,
            created_at: scan.created_at,
            updated_at: scan.updated_at,
            csv_lines: lines.into_iter().map(CsvLineView::from).collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct GsmDataView {
    pub pk: i64,
    pub operator: String,
    pub gsm_scan: Vec<i64>,
    pub created_at: DateTime<Utc>,
}
