pub mod validation;

pub use validation::{ensure_positive, ValidatedJson};
