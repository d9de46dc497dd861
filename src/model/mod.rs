// src/model/mod.rs

//! Catalog data model
//!
//! Plain values shared by the parser, the update pipeline and the store.

mod product;
mod repository;

pub use product::{Incompatibility, Product, Release};
pub use repository::{Repository, RepositoryMetadata};
