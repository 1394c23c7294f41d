/*!
 * Monitoring
 * Tracing subscriber setup and collective-call spans
 */

mod tracer;

pub use tracer::{init_tracing, span_collective, CollectiveSpan};
