// src/db/schema.rs

//! Database schema definitions and migrations
//!
//! This module defines the SQLite schema of the catalog store and provides
//! a migration system to evolve it over time. Staging tables are not part of
//! the persistent schema: they are created per update attempt as temporary
//! tables of the store's connection.

use crate::error::{Error, Result};
use rusqlite::Connection;
use tracing::{debug, info};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the schema version tracking table
fn init_schema_version(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;
    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> Result<i32> {
    init_schema_version(conn)?;

    let version = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )?;

    Ok(version)
}

fn set_schema_version(conn: &Connection, version: i32) -> Result<()> {
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Apply all pending migrations to bring the database up to date
pub fn migrate(conn: &Connection) -> Result<()> {
    let current_version = get_schema_version(conn)?;
    debug!("Current schema version: {}", current_version);

    if current_version >= SCHEMA_VERSION {
        return Ok(());
    }

    for version in (current_version + 1)..=SCHEMA_VERSION {
        info!("Applying migration to version {}", version);
        apply_migration(conn, version)?;
        set_schema_version(conn, version)?;
    }

    info!("Schema migration complete. Now at version {}", SCHEMA_VERSION);
    Ok(())
}

fn apply_migration(conn: &Connection, version: i32) -> Result<()> {
    match version {
        1 => migrate_v1(conn),
        _ => Err(Error::InitError(format!("Unknown migration version: {version}"))),
    }
}

/// Initial schema - Version 1
///
/// - repository: remote catalog sources with trust and cache state
/// - product: committed products, one row per (repository, package)
/// - category: category membership of committed products
fn migrate_v1(conn: &Connection) -> Result<()> {
    debug!("Creating schema version 1");

    conn.execute_batch(
        "
        CREATE TABLE repository (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            address TEXT NOT NULL,
            mirrors TEXT NOT NULL DEFAULT '[]',
            name TEXT NOT NULL DEFAULT '',
            description TEXT NOT NULL DEFAULT '',
            version INTEGER NOT NULL DEFAULT 0,
            enabled INTEGER NOT NULL DEFAULT 1,
            deleted INTEGER NOT NULL DEFAULT 0,
            fingerprint TEXT NOT NULL DEFAULT '',
            last_modified TEXT NOT NULL DEFAULT '',
            entity_tag TEXT NOT NULL DEFAULT '',
            updated INTEGER NOT NULL DEFAULT 0,
            timestamp INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE product (
            repository_id INTEGER NOT NULL,
            package_name TEXT NOT NULL,
            name TEXT NOT NULL,
            summary TEXT NOT NULL,
            description TEXT NOT NULL,
            added INTEGER NOT NULL,
            updated INTEGER NOT NULL,
            version_code INTEGER NOT NULL,
            compatible INTEGER NOT NULL,
            data TEXT NOT NULL,
            PRIMARY KEY (repository_id, package_name)
        );

        CREATE INDEX idx_product_package ON product(package_name);
        CREATE INDEX idx_product_name ON product(name);

        CREATE TABLE category (
            repository_id INTEGER NOT NULL,
            package_name TEXT NOT NULL,
            name TEXT NOT NULL,
            PRIMARY KEY (repository_id, package_name, name)
        );

        CREATE INDEX idx_category_name ON category(name);
        ",
    )?;

    Ok(())
}
