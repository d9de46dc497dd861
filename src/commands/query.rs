// src/commands/query.rs
//! Catalog queries

use anyhow::Result;
use catalog_sync::{SqliteStore, UpdaterConfig};

/// Search committed catalogs
pub fn cmd_search(config: &UpdaterConfig, query: &str, limit: usize) -> Result<()> {
    let store = SqliteStore::open(&config.db_path)?;
    let products = store.search(query, limit)?;

    if products.is_empty() {
        println!("No products matching '{}'", query);
        return Ok(());
    }

    for product in products {
        let version = product
            .selected_release()
            .map(|r| r.version.as_str())
            .unwrap_or("-");
        let mark = if product.is_compatible() { "" } else { " (incompatible)" };
        println!(
            "{} {} [{}]{}",
            product.package_name, version, product.repository_id, mark
        );
        if !product.summary.is_empty() {
            println!("    {}", product.summary);
        }
    }
    Ok(())
}
