pub mod config;
mod generation_routes;
mod http_layers;
pub mod metrics;
pub mod server;
pub mod state;
mod stream_asset;

pub use config::ServerConfig;
pub use http_layers::*;
pub use server::{make_app, run_server, serve};
pub use state::ServerState;
pub use stream_asset::{AssetError, ByteRange};
