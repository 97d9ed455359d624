pub mod catalog;
pub mod dispatcher;
pub mod params;
pub mod render;

pub use catalog::{FunctionCall, FunctionKind, FunctionName, CATALOG_VERSION};
pub use dispatcher::{Dispatched, Dispatcher, ReadOutput};
