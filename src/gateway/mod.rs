//! Gateway core: shared context, argument validation, result shaping, and
//! the describe/call/read dispatcher.

pub mod content;
pub mod context;
pub mod dispatcher;
pub mod errors;
pub mod validation;

pub use content::{extract_call_result, extract_read_result, unwrap_json_text, CallOutcome, Extracted};
pub use context::{ApplyReport, BackendStatus, GatewayContext};
pub use dispatcher::{call_params, DispatchOutput, Dispatcher, GatewayOperation};
pub use errors::GatewayError;
pub use validation::{arguments_object, validate_arguments};
