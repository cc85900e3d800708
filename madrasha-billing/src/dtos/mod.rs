//! Request and response bodies for the HTTP API.

mod academics;
mod invoices;
mod ledger;
mod payments;

pub use academics::*;
pub use invoices::*;
pub use ledger::*;
pub use payments::*;
