//! HTTP layer of the gateway.
//!
//! Request flow: [`routing`] classifies, [`auth`] authenticates, [`relay`]
//! talks to the upstream, and [`gateway`] ties them together.

pub mod auth;
pub mod disconnect;
pub mod gateway;
pub mod openai;
pub mod relay;
pub mod routing;
pub mod verify;

pub use gateway::{gateway_router, handle_request, GatewayState, RequestHandler};
pub use openai::OpenAiPassthrough;
pub use relay::{build_http_client, UpstreamRelay};
pub use routing::{classify, Route};
pub use verify::KeyVerifier;
