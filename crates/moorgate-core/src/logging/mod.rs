//! Logging abstractions
//!
//! Components take an injected `Arc<dyn Logger>` rather than a global
//! subscriber, so embedders (the HTTP router, tests) choose the sink.

mod traits;
mod noop;
mod console;

pub use traits::Logger;
pub use noop::NoOpLogger;
pub use console::ConsoleLogger;
