/// Collector payload and HTTP delivery
pub mod dispatcher;

pub use dispatcher::{CollectorPayload, Dispatch, HttpDispatcher, DEFAULT_DISPATCH_TIMEOUT};
