pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;
pub mod transcode;

pub use error::ApiError;
pub use routes::build_router;
pub use state::ApiState;
