//! Madrasha billing: monthly fee invoices, SSLCommerz reconciliation and the fund ledger.

pub mod config;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod startup;
pub mod utils;
