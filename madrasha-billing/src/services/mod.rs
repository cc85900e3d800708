//! Services for madrasha-billing.

pub mod database;
pub mod fee_resolver;
pub mod invoice_generator;
pub mod ledger_writer;
pub mod metrics;
pub mod payments;
pub mod sslcommerz;

pub use database::Database;
pub use fee_resolver::resolve_fee;
pub use invoice_generator::InvoiceGenerator;
pub use ledger_writer::{LedgerWriter, Settlement, SettlementOutcome};
pub use metrics::{get_metrics, init_metrics};
pub use payments::{CallbackOutcome, CallbackPayload, InitiatedPayment, PaymentService};
pub use sslcommerz::{GatewayError, SslCommerzClient};
