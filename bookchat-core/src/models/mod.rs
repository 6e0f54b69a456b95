pub mod message;
pub mod session;

pub use message::{now_millis, Message, Role, SourceType};
pub use session::{generate_session_id, generate_session_title, ChatSession};
