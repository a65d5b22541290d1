pub mod config;
pub mod crypto;
pub mod database;
pub mod error;
pub mod ledger;
pub mod policy;
pub mod signatures;
pub mod verification;

pub use error::TrustError;
