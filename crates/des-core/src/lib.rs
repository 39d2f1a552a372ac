pub mod audit;
pub mod clock;
pub mod completion;
pub mod config;
pub mod error;
pub mod event;
pub mod execution_log;
pub mod io;
pub mod orchestrator;
pub mod paths;
pub mod policy;
pub mod roadmap;
pub mod schema;
pub mod session;
pub mod step_file;
pub mod timeout;
pub mod types;
pub mod vcs;

pub use error::{DesError, Result};
