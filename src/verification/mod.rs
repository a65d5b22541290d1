//! Off-ledger collaborators and the workflows that tie them to the ledger.

pub mod judgment;
pub mod store;
pub mod workflow;

pub use judgment::{HttpSignatureJudge, Judgment, SignatureJudge, StaticSignatureJudge};
pub use store::{ContentStore, HttpContentStore, MemoryContentStore};
pub use workflow::{SignatureSubmission, TrustDecision, TrustPolicy, VerificationWorkflow};
