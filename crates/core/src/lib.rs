pub mod date;
pub mod money;
pub mod value;

pub use date::{parse_receipt_date, DateContext, DateOrder};
pub use money::{parse_ocr_amount, Money};
pub use value::{normalize_identifier, FieldValue, NormalizeError};
