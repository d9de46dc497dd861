// src/db/store.rs

//! SQLite-backed catalog store

use super::IndexStore;
use crate::error::{Error, Result};
use crate::model::{Product, Repository};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::path::Path;
use tracing::{debug, info};

const REPOSITORY_COLUMNS: &str = "id, address, mirrors, name, description, version, enabled, deleted,
     fingerprint, last_modified, entity_tag, updated, timestamp";

const STAGING_SCHEMA: &str = "
    DROP TABLE IF EXISTS temp.product_staging;
    DROP TABLE IF EXISTS temp.category_staging;
    CREATE TEMP TABLE product_staging (
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
    CREATE TEMP TABLE category_staging (
        repository_id INTEGER NOT NULL,
        package_name TEXT NOT NULL,
        name TEXT NOT NULL,
        PRIMARY KEY (repository_id, package_name, name)
    );
";

const DROP_STAGING: &str = "
    DROP TABLE IF EXISTS temp.product_staging;
    DROP TABLE IF EXISTS temp.category_staging;
";

/// Catalog store over a single SQLite connection
///
/// The connection is locked for the duration of one call, never across
/// calls. Staging tables are temporary tables of that connection, so a
/// crashed attempt leaves nothing behind in the database file.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (and migrate) the database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = super::open(path)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        super::configure(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert a repository and return it with its assigned ID
    pub fn add_repository(&self, repository: &Repository) -> Result<Repository> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO repository (address, mirrors, name, description, version, enabled, deleted,
             fingerprint, last_modified, entity_tag, updated, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                &repository.address,
                encode_list(&repository.mirrors)?,
                &repository.name,
                &repository.description,
                repository.version,
                repository.enabled,
                repository.deleted,
                &repository.fingerprint,
                &repository.last_modified,
                &repository.entity_tag,
                repository.updated,
                repository.timestamp,
            ],
        )?;

        let id = conn.last_insert_rowid();
        info!("Added repository {} ({})", id, repository.address);
        Ok(Repository {
            id,
            ..repository.clone()
        })
    }

    /// All repositories not marked deleted
    pub fn repositories(&self) -> Result<Vec<Repository>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {REPOSITORY_COLUMNS} FROM repository WHERE deleted = 0 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], repository_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter().map(|row| row.decode()).collect()
    }

    /// Persist every field of `repository`
    pub fn update_repository(&self, repository: &Repository) -> Result<()> {
        let conn = self.conn.lock();
        write_repository(&conn, repository)
    }

    /// Enable or disable a repository
    ///
    /// Cache tokens are cleared so the next update fetches the full catalog.
    pub fn set_enabled(&self, id: i64, enabled: bool) -> Result<Repository> {
        let repository = self.require(id)?.enable(enabled);
        self.update_repository(&repository)?;
        Ok(repository)
    }

    /// Mark a repository deleted; its rows go away on the next cleanup
    pub fn mark_deleted(&self, id: i64) -> Result<()> {
        let repository = Repository {
            deleted: true,
            ..self.require(id)?.enable(false)
        };
        self.update_repository(&repository)
    }

    /// Forget the pinned fingerprint so the next update pins a new signer
    pub fn reset_fingerprint(&self, id: i64) -> Result<Repository> {
        let repository = self.require(id)?.reset_fingerprint();
        self.update_repository(&repository)?;
        Ok(repository)
    }

    fn require(&self, id: i64) -> Result<Repository> {
        IndexStore::repository(self, id)?
            .ok_or_else(|| Error::NotFound(format!("Repository {id}")))
    }

    /// Committed products of a repository, ordered by package name
    pub fn products(&self, repository_id: i64) -> Result<Vec<Product>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT data FROM product WHERE repository_id = ?1 ORDER BY package_name",
        )?;
        let rows = stmt
            .query_map([repository_id], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.iter().map(|data| decode_product(data)).collect()
    }

    pub fn product_count(&self, repository_id: i64) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM product WHERE repository_id = ?1",
            [repository_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Categories of a committed product
    pub fn categories(&self, repository_id: i64, package_name: &str) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT name FROM category WHERE repository_id = ?1 AND package_name = ?2 ORDER BY name",
        )?;
        let names = stmt
            .query_map(params![repository_id, package_name], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(names)
    }

    /// Products of enabled repositories whose package name, name or summary contains `query`
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<Product>> {
        let conn = self.conn.lock();
        let pattern = format!("%{}%", escape_like(query));
        let mut stmt = conn.prepare(
            "SELECT p.data FROM product p
             JOIN repository r ON r.id = p.repository_id
             WHERE r.enabled = 1 AND r.deleted = 0
               AND (p.package_name LIKE ?1 ESCAPE '\\' OR p.name LIKE ?1 ESCAPE '\\'
                    OR p.summary LIKE ?1 ESCAPE '\\')
             ORDER BY p.name, p.package_name
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![pattern, limit as i64], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.iter().map(|data| decode_product(data)).collect()
    }
}

impl IndexStore for SqliteStore {
    fn create_staging_area(&self) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute_batch(STAGING_SCHEMA)?;
        debug!("Created staging area");
        Ok(())
    }

    fn write_staged(&self, repository_id: i64, products: &[Product]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut product_stmt = tx.prepare_cached(
                "INSERT OR REPLACE INTO temp.product_staging
                 (repository_id, package_name, name, summary, description, added, updated,
                  version_code, compatible, data)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            let mut category_stmt = tx.prepare_cached(
                "INSERT OR IGNORE INTO temp.category_staging (repository_id, package_name, name)
                 VALUES (?1, ?2, ?3)",
            )?;

            for product in products {
                let version_code = product
                    .selected_release()
                    .map(|r| r.version_code)
                    .unwrap_or_default();
                let data = serde_json::to_string(product)
                    .map_err(|e| Error::IoError(format!("Failed to encode product: {e}")))?;

                product_stmt.execute(params![
                    repository_id,
                    &product.package_name,
                    &product.name,
                    &product.summary,
                    &product.description,
                    product.added,
                    product.updated,
                    version_code,
                    product.is_compatible(),
                    data,
                ])?;
                for category in &product.categories {
                    category_stmt.execute(params![repository_id, &product.package_name, category])?;
                }
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn finalize(&self, repository: &Repository, commit: bool) -> Result<()> {
        let mut conn = self.conn.lock();
        if commit {
            let tx = conn.transaction()?;
            let flags: Option<(bool, bool)> = tx
                .query_row(
                    "SELECT enabled, deleted FROM repository WHERE id = ?1",
                    [repository.id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            match flags {
                None => return Err(Error::NotFound(format!("Repository {}", repository.id))),
                Some((enabled, deleted)) if !enabled || deleted => {
                    info!(
                        "Repository {} was disabled or removed, not committing",
                        repository.id
                    );
                    return Err(Error::Cancelled);
                }
                Some(_) => {}
            }
            replace_live_products(&tx, repository.id)?;
            write_catalog_state(&tx, repository)?;
            tx.commit()?;
            info!("Committed catalog of repository {}", repository.id);
        }
        conn.execute_batch(DROP_STAGING)?;
        Ok(())
    }

    fn removed_or_disabled(&self) -> Result<Vec<(i64, bool)>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT id, deleted FROM repository WHERE enabled = 0 OR deleted = 1 ORDER BY id",
        )?;
        let pairs = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pairs)
    }

    fn cleanup(&self, repositories: &[(i64, bool)]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        for &(id, deleted) in repositories {
            tx.execute("DELETE FROM product WHERE repository_id = ?1", [id])?;
            tx.execute("DELETE FROM category WHERE repository_id = ?1", [id])?;
            if deleted {
                tx.execute("DELETE FROM repository WHERE id = ?1", [id])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn repository(&self, id: i64) -> Result<Option<Repository>> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                &format!("SELECT {REPOSITORY_COLUMNS} FROM repository WHERE id = ?1"),
                [id],
                repository_from_row,
            )
            .optional()?;
        row.map(|row| row.decode()).transpose()
    }
}

fn replace_live_products(tx: &Transaction<'_>, repository_id: i64) -> Result<()> {
    tx.execute("DELETE FROM product WHERE repository_id = ?1", [repository_id])?;
    tx.execute("DELETE FROM category WHERE repository_id = ?1", [repository_id])?;
    tx.execute(
        "INSERT INTO product SELECT * FROM temp.product_staging WHERE repository_id = ?1",
        [repository_id],
    )?;
    tx.execute(
        "INSERT INTO category SELECT * FROM temp.category_staging WHERE repository_id = ?1",
        [repository_id],
    )?;
    Ok(())
}

fn write_repository(conn: &Connection, repository: &Repository) -> Result<()> {
    let changed = conn.execute(
        "UPDATE repository SET address = ?1, mirrors = ?2, name = ?3, description = ?4, version = ?5,
         enabled = ?6, deleted = ?7, fingerprint = ?8, last_modified = ?9, entity_tag = ?10,
         updated = ?11, timestamp = ?12 WHERE id = ?13",
        params![
            &repository.address,
            encode_list(&repository.mirrors)?,
            &repository.name,
            &repository.description,
            repository.version,
            repository.enabled,
            repository.deleted,
            &repository.fingerprint,
            &repository.last_modified,
            &repository.entity_tag,
            repository.updated,
            repository.timestamp,
            repository.id,
        ],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("Repository {}", repository.id)));
    }
    Ok(())
}

/// Columns an update owns; address, enabled and deleted stay as stored
fn write_catalog_state(conn: &Connection, repository: &Repository) -> Result<()> {
    let changed = conn.execute(
        "UPDATE repository SET mirrors = ?1, name = ?2, description = ?3, version = ?4,
         fingerprint = ?5, last_modified = ?6, entity_tag = ?7, updated = ?8, timestamp = ?9
         WHERE id = ?10",
        params![
            encode_list(&repository.mirrors)?,
            &repository.name,
            &repository.description,
            repository.version,
            &repository.fingerprint,
            &repository.last_modified,
            &repository.entity_tag,
            repository.updated,
            repository.timestamp,
            repository.id,
        ],
    )?;
    if changed == 0 {
        return Err(Error::NotFound(format!("Repository {}", repository.id)));
    }
    Ok(())
}

/// Repository row before its JSON columns are decoded
struct RepositoryRow {
    repository: Repository,
    mirrors: String,
}

impl RepositoryRow {
    fn decode(self) -> Result<Repository> {
        let mirrors = serde_json::from_str(&self.mirrors)
            .map_err(|e| Error::ParseError(format!("Invalid mirror list: {e}")))?;
        Ok(Repository {
            mirrors,
            ..self.repository
        })
    }
}

fn repository_from_row(row: &Row) -> rusqlite::Result<RepositoryRow> {
    Ok(RepositoryRow {
        repository: Repository {
            id: row.get(0)?,
            address: row.get(1)?,
            mirrors: Vec::new(),
            name: row.get(3)?,
            description: row.get(4)?,
            version: row.get(5)?,
            enabled: row.get(6)?,
            deleted: row.get(7)?,
            fingerprint: row.get(8)?,
            last_modified: row.get(9)?,
            entity_tag: row.get(10)?,
            updated: row.get(11)?,
            timestamp: row.get(12)?,
        },
        mirrors: row.get(2)?,
    })
}

fn encode_list(values: &[String]) -> Result<String> {
    serde_json::to_string(values).map_err(|e| Error::IoError(format!("Failed to encode list: {e}")))
}

fn decode_product(data: &str) -> Result<Product> {
    serde_json::from_str(data).map_err(|e| Error::ParseError(format!("Corrupt product row: {e}")))
}

fn escape_like(query: &str) -> String {
    query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
