//! Diesel schema definitions for the coverage tables (see `sql/schema.sql`).

diesel::table! {
    use diesel::sql_types::*;

    operators (id) {
        id -> Int8,
        #[max_length = 150]
        name -> Varchar,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    gsm_data (id) {
        id -> Int8,
        operator_id -> Int8,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    gsm_data_scans (gsm_data_id, gsm_scan_id) {
        gsm_data_id -> Int8,
        gsm_scan_id -> Int8,
        created_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    gsm_scans (id) {
        id -> Int8,
        file_name -> Text,
        file_path -> Text,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    use diesel::sql_types::*;

    csv_lines (id) {
        id -> Int8,
        scan_id -> Int8,
        time -> Nullable<Timestamptz>,
        lat -> Nullable<Float8>,
        lon -> Nullable<Float8>,
        alt -> Nullable<Float8>,
        gps_fix -> Int2,
        #[max_length = 10]
        rat -> Varchar,
        #[max_length = 10]
        mccmnc -> Varchar,
        cell_id -> Nullable<Int8>,
        pci -> Nullable<Int2>,
        #[max_length = 30]
        band -> Varchar,
        earfcn -> Nullable<Int4>,
        rsrp_dbm -> Nullable<Int4>,
        rsrq_db -> Nullable<Float8>,
        sinr_db -> Nullable<Float8>,
        created_at -> Timestamptz,
        updated_at -> Timestamptz,
    }
}

diesel::joinable!(gsm_data -> operators (operator_id));
diesel::joinable!(gsm_data_scans -> gsm_data (gsm_data_id));
diesel::joinable!(gsm_data_scans -> gsm_scans (gsm_scan_id));
diesel::joinable!(csv_lines -> gsm_scans (scan_id));

diesel::allow_tables_to_appear_in_same_query!(
    operators,
    gsm_data,
    gsm_data_scans,
    gsm_scans,
    csv_lines,
);
