//! Handler-side decorators.

pub mod access_log;
pub mod request_id;

pub use access_log::{access_log, AccessLog};
pub use request_id::{request_id, RequestId, RequestIdHandler, X_REQUEST_ID};
