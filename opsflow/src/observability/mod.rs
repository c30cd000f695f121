//! Logging setup and timing helpers.

mod logging;
mod timing;

pub use logging::{build_filter, init_tracing};
pub use timing::SpanTimer;
