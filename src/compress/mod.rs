//! Size reduction for what crosses the front end: schemas going out in
//! descriptions, results coming back from backends.

pub mod response;
pub mod schema;
pub mod toon;

pub use response::{detect_data_type, is_compressible, plain_text, DataType, ResponseCompressor};
pub use schema::{compress_schema, SchemaCompressor};
pub use toon::encode_toon;
