pub mod config;
pub mod dispatch;
pub mod error;
pub mod frame_sampler;
pub mod gemini;
pub mod image_processing;
pub mod job_poller;
pub mod mcp_server;
pub mod orchestrator;
pub mod resolver;
pub mod store;
pub mod thread;
pub mod tools;
pub mod veo;
pub mod web_routes;

pub use error::{RemixError, Result};
