mod message;
mod routing;
mod tool;
mod util;

pub use message::{Message, Role};
pub use routing::{Candidate, SelectedTool, Slate};
pub use tool::{ServerStatus, ToolSpec, TransportKind};
pub use util::{estimate_schema_tokens, short_hash};
