//! Validation and typed parsing of uploaded scan CSV files.
//!
//! [`parse_and_validate`] performs every check an upload goes through before
//! anything is written: file name, CSV well-formedness, the required column
//! set and per-cell conversion. Its output is handed to the write phase as is.

use crate::{
    error::{Result, ServiceError},
    models::Measurement,
};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use csv::{ReaderBuilder, StringRecord, Trim};

/// Columns every upload must carry, in canonical order.
pub const REQUIRED_COLUMNS: [&str; 14] = [
    "time", "lat", "lon", "alt", "gps_fix", "rat", "mccmnc", "cell_id", "pci", "band", "earfcn",
    "rsrp_dbm", "rsrq_db", "sinr_db",
];

pub const DEFAULT_GPS_FIX: i16 = 3;
pub const RAT_MAX_LEN: usize = 10;
pub const MCCMNC_MAX_LEN: usize = 10;
pub const BAND_MAX_LEN: usize = 30;

const ABSENT_MARKERS: [&str; 8] = ["", "na", "n/a", "nan", "null", "none", "<na>", "#n/a"];

#[derive(Clone, Copy)]
enum Column {
    Time,
    Lat,
    Lon,
    Alt,
    GpsFix,
    Rat,
    Mccmnc,
    CellId,
    Pci,
    Band,
    Earfcn,
    RsrpDbm,
    RsrqDb,
    SinrDb,
}

impl Column {
    fn name(self) -> &'static str {
        REQUIRED_COLUMNS[self as usize]
    }
}

/// Parsed contents of one upload, one entry per data row in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanTable {
    pub rows: Vec<Measurement>,
}

impl ScanTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

pub fn parse_and_validate(file_name: &str, bytes: &[u8]) -> Result<ScanTable> {
    ensure_csv_name(file_name)?;
    let (headers, records) = read_records(bytes)?;
    let columns = ColumnIndex::resolve(&headers)?;
    let rows = records
        .iter()
        .map(|(line, record)| columns.measurement(*line, record))
        .collect::<Result<Vec<_>>>()?;
    Ok(ScanTable { rows })
}

fn ensure_csv_name(file_name: &str) -> Result<()> {
    let has_extension = file_name
        .rsplit_once('.')
        .map(|(stem, ext)| !stem.is_empty() && ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);
    if has_extension {
        Ok(())
    } else {
        Err(ServiceError::InvalidFormat(format!(
            "'{file_name}' does not have a .csv extension"
        )))
    }
}

fn read_records(bytes: &[u8]) -> Result<(StringRecord, Vec<(u64, StringRecord)>)> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(Trim::All)
        .from_reader(bytes);

    let headers = reader.headers().map_err(corrupt)?.clone();
    if headers.iter().all(str::is_empty) {
        return Err(ServiceError::CorruptFile("file has no header row".into()));
    }

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result.map_err(corrupt)?;
        let line = record
            .position()
            .map(|pos| pos.line())
            .unwrap_or(records.len() as u64 + 2);
        records.push((line, record));
    }
    Ok((headers, records))
}

fn corrupt(err: csv::Error) -> ServiceError {
    ServiceError::CorruptFile(err.to_string())
}

struct ColumnIndex {
    positions: [usize; REQUIRED_COLUMNS.len()],
}

impl ColumnIndex {
    fn resolve(headers: &StringRecord) -> Result<Self> {
        let mut positions = [0usize; REQUIRED_COLUMNS.len()];
        let mut missing = Vec::new();
        for (slot, name) in positions.iter_mut().zip(REQUIRED_COLUMNS) {
            match headers.iter().position(|header| header == name) {
                Some(pos) => *slot = pos,
                None => missing.push(name.to_string()),
            }
        }

        if missing.is_empty() {
            Ok(Self { positions })
        } else {
            Err(ServiceError::SchemaMismatch { missing })
        }
    }

    fn measurement(&self, line: u64, record: &StringRecord) -> Result<Measurement> {
        let cell = |column: Column| Cell {
            line,
            column: column.name(),
            raw: record.get(self.positions[column as usize]).unwrap_or(""),
        };

        Ok(Measurement {
            time: cell(Column::Time).timestamp()?,
            lat: cell(Column::Lat).float()?,
            lon: cell(Column::Lon).float()?,
            alt: cell(Column::Alt).float()?,
            gps_fix: cell(Column::GpsFix)
                .integer(Some(0))?
                .unwrap_or(DEFAULT_GPS_FIX),
            rat: cell(Column::Rat).text(RAT_MAX_LEN)?,
            mccmnc: cell(Column::Mccmnc).text(MCCMNC_MAX_LEN)?,
            cell_id: cell(Column::CellId).integer(None)?,
            pci: cell(Column::Pci).integer(Some(0))?,
            band: cell(Column::Band).text(BAND_MAX_LEN)?,
            earfcn: cell(Column::Earfcn).integer(Some(0))?,
            rsrp_dbm: cell(Column::RsrpDbm).integer(None)?,
            rsrq_db: cell(Column::RsrqDb).float()?,
            sinr_db: cell(Column::SinrDb).float()?,
        })
    }
}

struct Cell<'r> {
    line: u64,
    column: &'static str,
    raw: &'r str,
}

impl Cell<'_> {
    fn is_absent(&self) -> bool {
        ABSENT_MARKERS
            .iter()
            .any(|marker| self.raw.eq_ignore_ascii_case(marker))
    }

    fn invalid(&self, reason: impl std::fmt::Display) -> ServiceError {
        ServiceError::CorruptFile(format!(
            "line {}, column '{}': {reason}",
            self.line, self.column
        ))
    }

    fn float(&self) -> Result<Option<f64>> {
        if self.is_absent() {
            return Ok(None);
        }
        match self.raw.parse::<f64>() {
            Ok(value) if value.is_finite() => Ok(Some(value)),
            _ => Err(self.invalid(format!("'{}' is not a number", self.raw))),
        }
    }

    /// Parses an integer, accepting integral float spellings such as `123456.0`.
    fn integer<T: TryFrom<i64>>(&self, min: Option<i64>) -> Result<Option<T>> {
        if self.is_absent() {
            return Ok(None);
        }
        let value = match self.raw.parse::<i64>() {
            Ok(value) => value,
            Err(_) => match self.raw.parse::<f64>() {
                Ok(value)
                    if value.is_finite()
                        && value.fract() == 0.0
                        && value.abs() < i64::MAX as f64 =>
                {
                    value as i64
                }
                _ => return Err(self.invalid(format!("'{}' is not an integer", self.raw))),
            },
        };
        if let Some(min) = min {
            if value < min {
                return Err(self.invalid(format!("{value} is below the minimum of {min}")));
            }
        }
        T::try_from(value)
            .map(Some)
            .map_err(|_| self.invalid(format!("{value} is out of range")))
    }

    fn timestamp(&self) -> Result<Option<DateTime<Utc>>> {
        if self.is_absent() {
            return Ok(None);
        }
        if let Ok(ts) = DateTime::parse_from_rfc3339(self.raw) {
            return Ok(Some(ts.with_timezone(&Utc)));
        }
        for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(self.raw, format) {
                return Ok(Some(naive.and_utc()));
            }
        }
        if let Ok(date) = NaiveDate::parse_from_str(self.raw, "%Y-%m-%d") {
            return Ok(Some(date.and_time(NaiveTime::default()).and_utc()));
        }
        Err(self.invalid(format!("'{}' is not a timestamp", self.raw)))
    }

    fn text(&self, max_len: usize) -> Result<String> {
        if self.is_absent() {
            return Err(self.invalid("a value is required"));
        }
        if self.raw.chars().count() > max_len {
            return Err(self.invalid(format!("longer than {max_len} characters")));
        }
        Ok(self.raw.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    const HEADER: &str =
        "time,lat,lon,alt,gps_fix,rat,mccmnc,cell_id,pci,band,earfcn,rsrp_dbm,rsrq_db,sinr_db";
    const ROW: &str = "2024-01-01T00:00:00,48.85,2.35,35,3,LTE,20801,123456,10,B3,1575,-95,10.5,12.1";

    fn csv(lines: &[&str]) -> Vec<u8> {
        let mut body = lines.join("\n");
        body.push('\n');
        body.into_bytes()
    }

    fn expect_corrupt(result: Result<ScanTable>) -> String {
        match result {
            Err(ServiceError::CorruptFile(detail)) => detail,
            other => panic!("expected CorruptFile, got {other:?}"),
        }
    }

    #[test]
    fn parses_reference_row() {
        let table = parse_and_validate("scan.csv", &csv(&[HEADER, ROW])).unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.rows[0],
            Measurement {
                time: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
                lat: Some(48.85),
                lon: Some(2.35),
                alt: Some(35.0),
                gps_fix: 3,
                rat: "LTE".into(),
                mccmnc: "20801".into(),
                cell_id: Some(123_456),
                pci: Some(10),
                band: "B3".into(),
                earfcn: Some(1575),
                rsrp_dbm: Some(-95),
                rsrq_db: Some(10.5),
                sinr_db: Some(12.1),
            }
        );
    }

    #[test]
    fn keeps_duplicate_rows() {
        let table = parse_and_validate("scan.csv", &csv(&[HEADER, ROW, ROW, ROW])).unwrap();
        assert_eq!(table.len(), 3);
        assert_eq!(table.rows[0], table.rows[2]);
    }

    #[test]
    fn rejects_non_csv_name_before_parsing() {
        let err = parse_and_validate("scan.txt", b"\xff\xfe not even text").unwrap_err();
        assert!(matches!(err, ServiceError::InvalidFormat(_)), "{err:?}");

        let err = parse_and_validate("csv", &csv(&[HEADER, ROW])).unwrap_err();
        assert!(matches!(err, ServiceError::InvalidFormat(_)), "{err:?}");
    }

    #[test]
    fn extension_check_ignores_case() {
        assert!(parse_and_validate("SCAN.CSV", &csv(&[HEADER, ROW])).is_ok());
    }

    #[test]
    fn missing_band_is_a_schema_mismatch() {
        let header = HEADER.replace(",band", "");
        let row = ROW.replace(",B3", "");
        let err = parse_and_validate("scan.csv", &csv(&[&header, &row])).unwrap_err();
        match err {
            ServiceError::SchemaMismatch { missing } => assert_eq!(missing, vec!["band"]),
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn missing_columns_are_reported_in_canonical_order() {
        let err = parse_and_validate("scan.csv", &csv(&["sinr_db,lat,rat", "1,2,LTE"])).unwrap_err();
        match err {
            ServiceError::SchemaMismatch { missing } => assert_eq!(
                missing,
                vec![
                    "time", "lon", "alt", "gps_fix", "mccmnc", "cell_id", "pci", "band", "earfcn",
                    "rsrp_dbm", "rsrq_db"
                ]
            ),
            other => panic!("expected SchemaMismatch, got {other:?}"),
        }
    }

    #[test]
    fn ragged_rows_are_corrupt() {
        let detail = expect_corrupt(parse_and_validate(
            "scan.csv",
            &csv(&[HEADER, ROW, "2024-01-01T00:00:00,48.85"]),
        ));
        assert!(detail.contains("fields"), "{detail}");
    }

    #[test]
    fn corrupt_content_wins_over_missing_columns() {
        let result = parse_and_validate("scan.csv", &csv(&["a,b", "1,2,3"]));
        expect_corrupt(result);
    }

    #[test]
    fn invalid_utf8_is_corrupt() {
        let mut bytes = csv(&[HEADER]);
        bytes.extend_from_slice(b"\xff\xff,1,2\n");
        expect_corrupt(parse_and_validate("scan.csv", &bytes));
    }

    #[test]
    fn empty_file_is_corrupt() {
        expect_corrupt(parse_and_validate("scan.csv", b""));
    }

    #[test]
    fn header_only_file_has_no_rows() {
        let table = parse_and_validate("scan.csv", &csv(&[HEADER])).unwrap();
        assert!(table.is_empty());
    }

    #[test]
    fn blank_and_nan_cells_are_absent() {
        let row = ",NaN,,nan,,UMTS,20810,,,B1,,,,";
        let table = parse_and_validate("scan.csv", &csv(&[HEADER, row])).unwrap();
        let m = &table.rows[0];
        assert_eq!(m.time, None);
        assert_eq!(m.lat, None);
        assert_eq!(m.alt, None);
        assert_eq!(m.gps_fix, DEFAULT_GPS_FIX);
        assert_eq!(m.cell_id, None);
        assert_eq!(m.pci, None);
        assert_eq!(m.earfcn, None);
        assert_eq!(m.rsrp_dbm, None);
        assert_eq!(m.rat, "UMTS");
    }

    #[test]
    fn integral_floats_are_accepted_for_integer_columns() {
        let row = ROW.replace("123456", "123456.0").replace(",10,", ",10.0,");
        let table = parse_and_validate("scan.csv", &csv(&[HEADER, &row])).unwrap();
        assert_eq!(table.rows[0].cell_id, Some(123_456));
        assert_eq!(table.rows[0].pci, Some(10));
    }

    #[test]
    fn fractional_integer_is_corrupt() {
        let row = ROW.replace(",1575,", ",1575.5,");
        let detail = expect_corrupt(parse_and_validate("scan.csv", &csv(&[HEADER, &row])));
        assert!(detail.contains("'earfcn'"), "{detail}");
        assert!(detail.contains("line 2"), "{detail}");
    }

    #[test]
    fn negative_pci_is_corrupt() {
        let row = ROW.replace(",10,B3", ",-1,B3");
        let detail = expect_corrupt(parse_and_validate("scan.csv", &csv(&[HEADER, &row])));
        assert!(detail.contains("'pci'"), "{detail}");
    }

    #[test]
    fn pci_out_of_range_is_corrupt() {
        let row = ROW.replace(",10,B3", ",40000,B3");
        let detail = expect_corrupt(parse_and_validate("scan.csv", &csv(&[HEADER, &row])));
        assert!(detail.contains("out of range"), "{detail}");
    }

    #[test]
    fn bad_float_reports_line_and_column() {
        let second = ROW.replace("48.85", "north");
        let detail = expect_corrupt(parse_and_validate(
            "scan.csv",
            &csv(&[HEADER, ROW, &second]),
        ));
        assert_eq!(detail, "line 3, column 'lat': 'north' is not a number");
    }

    #[test]
    fn required_text_must_be_present() {
        let row = ROW.replace(",LTE,", ",,");
        let detail = expect_corrupt(parse_and_validate("scan.csv", &csv(&[HEADER, &row])));
        assert!(detail.contains("'rat'"), "{detail}");
    }

    #[test]
    fn overlong_band_is_corrupt() {
        let band = "B".repeat(BAND_MAX_LEN + 1);
        let row = ROW.replace(",B3,", &format!(",{band},"));
        let detail = expect_corrupt(parse_and_validate("scan.csv", &csv(&[HEADER, &row])));
        assert!(detail.contains("'band'"), "{detail}");
    }

    #[test]
    fn timestamps_accept_common_spellings() {
        let rows = [
            ROW.replace("2024-01-01T00:00:00", "2024-01-01 12:30:00"),
            ROW.replace("2024-01-01T00:00:00", "2024-01-01T12:30:00.250"),
            ROW.replace("2024-01-01T00:00:00", "2024-01-01T13:30:00+01:00"),
            ROW.replace("2024-01-01T00:00:00", "2024-01-01"),
        ];
        let lines: Vec<&str> = std::iter::once(HEADER)
            .chain(rows.iter().map(String::as_str))
            .collect();
        let table = parse_and_validate("scan.csv", &csv(&lines)).unwrap();

        let noon_thirty = Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap();
        assert_eq!(table.rows[0].time, Some(noon_thirty));
        assert_eq!(
            table.rows[1].time,
            Some(noon_thirty + chrono::Duration::milliseconds(250))
        );
        assert_eq!(table.rows[2].time, Some(noon_thirty));
        assert_eq!(
            table.rows[3].time,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())
        );
    }

    #[test]
    fn extra_columns_and_reordering_are_tolerated() {
        let header = format!("comment,{}", HEADER.split(',').rev().collect::<Vec<_>>().join(","));
        let row = format!("hello,{}", ROW.split(',').rev().collect::<Vec<_>>().join(","));
        let table = parse_and_validate("scan.csv", &csv(&[&header, &row])).unwrap();
        assert_eq!(table.rows[0].rat, "LTE");
        assert_eq!(table.rows[0].rsrp_dbm, Some(-95));
    }
}
