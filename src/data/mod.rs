pub mod csv_table;
pub mod sanitize;
pub mod types;
