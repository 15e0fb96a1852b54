//! HTTP surface of the SkillBridge operation-delegation bridge.
//!
//! Three routes:
//! - `GET /health`
//! - `POST /invoke/{skillPath}` generic synchronous invoke with topics in headers
//! - `POST /operations/{assetId}/{skillName}` invoke a registered (or conventional) skill

pub mod handlers;
pub mod models;
pub mod server;
pub mod shutdown;

pub use models::{ApiResult, ErrorResponse};
pub use server::{MAX_REQUEST_BODY_SIZE, ServerState, create_router, run, serve};
