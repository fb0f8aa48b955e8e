//! Front ends: the JSON-RPC handler and the stdio/HTTP servers that carry it.

pub mod http;
pub mod port;
pub mod rpc;
pub mod stdio;

pub use http::{router, serve_http};
pub use port::find_available_port;
pub use rpc::{RpcHandler, RpcRequest, SERVER_NAME};
pub use stdio::{serve_lines, serve_stdio};
