pub mod bus;
pub mod classroom;
pub mod error;
pub mod http;
pub mod observability;
pub mod state;
pub mod utils;

pub use error::{HandlerError, HandlerResult, Prerequisite};
pub use state::{AppState, build_state};

#[cfg(test)]
pub mod test_support;
