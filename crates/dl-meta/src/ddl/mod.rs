//! Meta schema DDL, compiled into the binary.

/// One numbered schema step
pub struct Migration {
    pub version: i32,
    pub sql: &'static str,
}

/// Schema steps in ascending version order
pub static MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    sql: include_str!("v001_initial.sql"),
}];

/// Version a fully migrated database reports
pub fn latest_version() -> i32 {
    MIGRATIONS.last().map_or(0, |m| m.version)
}
