pub mod content;
pub mod handler;
pub mod protocol;
pub mod tool;

pub use content::Content;
pub use handler::{ToolError, ToolHandler};
pub use tool::Tool;
