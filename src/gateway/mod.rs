// Nuclino MCP — Gateway Module
//
// Session management and the transports that carry MCP frames between
// clients and per-session MCP services: multi-session HTTP and
// single-session stdio.

mod error;
mod http;
mod protocol;
mod session;
mod stdio;
mod stream;
mod transport;

pub use error::{GatewayError, Rejection, StreamError};
pub use http::{HttpGateway, API_KEY_HEADER, SESSION_ID_HEADER};
pub use session::{Session, SessionRegistry};
pub use stdio::StdioGateway;
pub use stream::{OutboundFrames, SessionStream};
pub use transport::Transport;
