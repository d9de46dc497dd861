// src/update/merger.rs

//! Disk-backed merge buffer
//!
//! A catalog lists products and their releases in separate sections, so a
//! product is only complete once the whole stream has been read. Records go
//! into a scratch SQLite file instead of memory and are replayed in pages
//! once parsing is done. The file lives in the scratch directory and is
//! removed when the buffer is dropped.

use crate::error::{Error, Result};
use crate::model::{Product, Release};
use rusqlite::{params, Connection};
use std::path::Path;
use tempfile::{Builder, TempPath};
use tracing::debug;

const SCHEMA: &str = "
    CREATE TABLE product (
        package_name TEXT PRIMARY KEY NOT NULL,
        data TEXT NOT NULL
    );
    CREATE TABLE releases (
        package_name TEXT PRIMARY KEY NOT NULL,
        data TEXT NOT NULL
    );
";

/// Scratch store for one update attempt
pub struct MergeBuffer {
    // Declared before `path` so the connection closes before the file is removed
    conn: Connection,
    path: TempPath,
}

impl MergeBuffer {
    /// Create an empty buffer file in `scratch_dir`
    pub fn create(scratch_dir: &Path, attempt_id: &str) -> Result<Self> {
        std::fs::create_dir_all(scratch_dir)?;
        let path = Builder::new()
            .prefix(&format!("merge-{attempt_id}-"))
            .suffix(".db")
            .tempfile_in(scratch_dir)?
            .into_temp_path();

        let conn = Connection::open(&path)?;
        // Scratch data: no rollback journal, no fsync
        let _: String = conn.pragma_update_and_check(None, "journal_mode", "OFF", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "OFF")?;
        conn.execute_batch(SCHEMA)?;

        debug!("Created merge buffer {}", path.display());
        Ok(Self { conn, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append products
    ///
    /// A later record for the same package replaces the earlier one's data
    /// but keeps its position in arrival order.
    pub fn add_products(&mut self, products: &[Product]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO product (package_name, data) VALUES (?1, ?2)
                 ON CONFLICT(package_name) DO UPDATE SET data = excluded.data",
            )?;
            for product in products {
                stmt.execute(params![product.package_name, encode(product)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Append release lists keyed by package name
    pub fn add_releases(&mut self, releases: &[(String, Vec<Release>)]) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO releases (package_name, data) VALUES (?1, ?2)
                 ON CONFLICT(package_name) DO UPDATE SET data = excluded.data",
            )?;
            for (package_name, list) in releases {
                stmt.execute(params![package_name, encode(list)?])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    /// Number of buffered products
    pub fn count(&self) -> Result<u64> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM product", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Replay products in arrival order, joined with their releases
    ///
    /// `f` receives pages of at most `page_size` products, all tagged with
    /// `repository_id`, together with the total product count. An error from
    /// `f` stops the drain and is returned.
    pub fn drain<F>(&self, repository_id: i64, page_size: usize, mut f: F) -> Result<()>
    where
        F: FnMut(Vec<Product>, u64) -> Result<()>,
    {
        let total = self.count()?;
        let page_size = page_size.max(1);

        let mut stmt = self.conn.prepare(
            "SELECT p.data, r.data FROM product p
             LEFT JOIN releases r ON r.package_name = p.package_name
             ORDER BY p.rowid",
        )?;
        let mut rows = stmt.query([])?;

        let mut page = Vec::with_capacity(page_size);
        while let Some(row) = rows.next()? {
            let product_data: String = row.get(0)?;
            let releases_data: Option<String> = row.get(1)?;

            let mut product: Product = decode(&product_data)?;
            product.repository_id = repository_id;
            if let Some(data) = releases_data {
                product.releases = decode(&data)?;
            }
            page.push(product);

            if page.len() == page_size {
                f(std::mem::replace(&mut page, Vec::with_capacity(page_size)), total)?;
            }
        }
        if !page.is_empty() {
            f(page, total)?;
        }
        Ok(())
    }
}

fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| Error::IoError(format!("Failed to encode merge record: {e}")))
}

fn decode<T: serde::de::DeserializeOwned>(data: &str) -> Result<T> {
    serde_json::from_str(data)
        .map_err(|e| Error::IoError(format!("Corrupt merge record: {e}")))
}
