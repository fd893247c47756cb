//! billing-docs-service: invoice and quote numbering, totals, payments and e-signatures.
pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;
