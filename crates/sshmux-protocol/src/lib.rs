pub mod catalogue;
pub mod dispatcher;
pub mod handlers;
pub mod schema;

pub use dispatcher::Dispatcher;
pub use handlers::ToolResult;
