pub mod commerce;
pub mod payment_ledger;

pub use payment_ledger::Entity as PaymentLedger;
