pub mod catalog;
pub mod config;
pub mod data_types;
pub mod frontend;
pub mod ordering;
pub mod properties;
pub mod query;
pub mod repository;
pub mod sort;

extern crate lazy_static;

#[cfg(test)]
pub(crate) mod testutils;
