use tracing::debug;

use crate::snapshot::{CellValue, TableSnapshot};

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// One spreadsheet row, already rendered to text.
pub type SheetRow = Vec<String>;

/// Renders a snapshot as sheet rows with the column names as the first row.
pub fn normalize(snapshot: &TableSnapshot) -> Vec<SheetRow> {
    debug!(
        "Normalizing {} rows with {} columns",
        snapshot.row_count(),
        snapshot.column_count()
    );

    let mut rows = Vec::with_capacity(snapshot.row_count() + 1);
    rows.push(snapshot.columns().to_vec());
    rows.extend(
        snapshot
            .rows()
            .iter()
            .map(|row| row.iter().map(normalize_value).collect()),
    );
    rows
}

pub fn normalize_value(value: &CellValue) -> String {
    match value {
        CellValue::Null => String::new(),
        // A NaN float is treated as missing.
        CellValue::Float(f) if f.is_nan() => String::new(),
        CellValue::Bool(b) => b.to_string(),
        CellValue::Int(n) => n.to_string(),
        CellValue::Float(f) => f.to_string(),
        CellValue::Numeric(d) => d.to_string(),
        CellValue::Text(s) => s.clone(),
        CellValue::Date(d) => d.to_string(),
        CellValue::Time(t) => t.format("%H:%M:%S").to_string(),
        CellValue::Timestamp(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        CellValue::TimestampTz(ts) => ts.format(TIMESTAMP_FORMAT).to_string(),
        CellValue::Uuid(u) => u.to_string(),
        CellValue::Json(j) => j.to_string(),
        CellValue::Bytes(b) => hex_string(b),
        CellValue::Unsupported(type_name) => format!("<{}>", type_name),
    }
}

// Same shape Postgres prints for bytea.
fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    fn ts(y: i32, m: u32, d: u32, h: u32, mi: u32, s: u32) -> CellValue {
        CellValue::Timestamp(
            NaiveDate::from_ymd_opt(y, m, d)
                .unwrap()
                .and_hms_opt(h, mi, s)
                .unwrap(),
        )
    }

    #[test]
    fn users_table_renders_header_then_rows() {
        let snapshot = TableSnapshot::new(
            vec!["id".into(), "name".into(), "created_at".into()],
            vec![
                vec![
                    CellValue::Int(1),
                    CellValue::Text("Ann".into()),
                    ts(2024, 1, 1, 0, 0, 0),
                ],
                vec![CellValue::Int(2), CellValue::Text("Bo".into()), CellValue::Null],
            ],
        )
        .unwrap();

        assert_eq!(
            normalize(&snapshot),
            vec![
                vec!["id", "name", "created_at"],
                vec!["1", "Ann", "2024-01-01 00:00:00"],
                vec!["2", "Bo", ""],
            ]
        );
    }

    #[test]
    fn output_shape_is_rows_plus_header_by_columns() {
        let columns: Vec<String> = (0..4).map(|i| format!("c{}", i)).collect();
        let rows: Vec<Vec<CellValue>> = (0..7)
            .map(|r| (0..4).map(|c| CellValue::Int(r * 10 + c)).collect())
            .collect();
        let snapshot = TableSnapshot::new(columns, rows).unwrap();

        let out = normalize(&snapshot);
        assert_eq!(out.len(), 8);
        assert!(out.iter().all(|row| row.len() == 4));
    }

    #[test]
    fn empty_table_yields_header_only() {
        let out = normalize(&TableSnapshot::empty(vec!["a".into(), "b".into()]));
        assert_eq!(out, vec![vec!["a", "b"]]);
    }

    #[test]
    fn timestamps_drop_fractions_and_zone() {
        let with_tz = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 58).unwrap()
            + chrono::Duration::milliseconds(750);
        assert_eq!(
            normalize_value(&CellValue::TimestampTz(with_tz)),
            "2023-12-31 23:59:58"
        );
        assert_eq!(normalize_value(&ts(2020, 2, 29, 7, 5, 3)), "2020-02-29 07:05:03");
    }

    #[test]
    fn scalar_values_use_default_text() {
        assert_eq!(normalize_value(&CellValue::Null), "");
        assert_eq!(normalize_value(&CellValue::Bool(true)), "true");
        assert_eq!(normalize_value(&CellValue::Float(2.5)), "2.5");
        assert_eq!(normalize_value(&CellValue::Float(f64::NAN)), "");
        assert_eq!(normalize_value(&CellValue::Float(f64::INFINITY)), "inf");
        assert_eq!(
            normalize_value(&CellValue::Numeric(Decimal::from_str("10.50").unwrap())),
            "10.50"
        );
        assert_eq!(
            normalize_value(&CellValue::Json(serde_json::json!({"a": 1}))),
            r#"{"a":1}"#
        );
        assert_eq!(normalize_value(&CellValue::Bytes(vec![0xde, 0xad])), "\\xdead");
        assert_eq!(
            normalize_value(&CellValue::Unsupported("tsvector".into())),
            "<tsvector>"
        );
    }
}
