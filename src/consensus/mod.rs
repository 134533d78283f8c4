pub mod finality;
pub mod messages;
pub mod quorum;
pub mod validator_set;

pub use finality::{FinalityCertificate, FinalityError, FinalityManager};
pub use messages::*;
pub use quorum::*;
pub use validator_set::*;
