pub mod compatible;
pub mod traits;

pub use compatible::CompletionClient;
pub use traits::{ByteStream, PromptTurn, Provider, Role};
