/*!
 * Decoding engine: subprocess lifecycle, launch settings and socket client.
 */

pub mod client;
pub mod config;
pub mod endpoint;
pub mod process;

pub use client::{Connector, DecoderClient, DecoderConnection, ReconnectPolicy, WsConnector, REQUEST_ATTEMPTS};
pub use config::DecoderConfig;
pub use endpoint::DecoderEndpoint;
pub use process::{DecoderLaunch, DecoderProcess, DecoderState};
