//! Event dispatch: admission, per-type pipelines, handler registry.

mod dispatcher;
mod event;
mod pipeline;
mod registry;

pub use dispatcher::{Dispatcher, DispatcherParams};
pub use event::{DispatchHandle, Event, EventDataElement};
pub use pipeline::Pipeline;
pub use registry::{callback, Handler, HandlerCallback, HandlerFuture, HandlerRegistry};
