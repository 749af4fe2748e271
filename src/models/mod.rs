pub mod ledger;
pub mod session;
pub mod token;
