//! Organization Registry and Policy Voting
//!
//! Registration of participating organizations and the
//! propose / vote / execute state machine for organ-allocation policies.

pub mod organizations;
pub mod registry;
pub mod types;

pub use organizations::OrganizationRegistry;
pub use registry::{PolicyProposal, PolicyRegistry};
pub use types::*;
