//! Domain models for madrasha-billing.

mod academics;
mod fee;
mod invoice;
mod ledger;
mod payment;

pub use academics::{
    Batch, Course, CreateStudent, Department, Enrollment, FeeScope, FeeTier, Student,
    StudentFeeTier, TierFee,
};
pub use fee::{FeeCandidates, FeeSource, ResolvedFee};
pub use invoice::{
    GenerationOutcome, GenerationReport, Invoice, InvoiceRun, InvoiceStatus, ListInvoicesFilter,
};
pub use ledger::{
    CorrectExpense, CreateLedgerEntry, Direction, FundBalance, FundType, LedgerEntry,
    ListLedgerFilter,
};
pub use payment::{
    CreatePaymentSession, GatewayTransaction, PaymentMethod, PaymentSession,
    PaymentSessionStatus,
};
