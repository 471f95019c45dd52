pub mod card;
pub mod content;
pub mod events;
pub mod lark;
pub mod thread;
pub mod traits;

pub use card::Card;
pub use events::{parse_event, ChatType, InboundEvent, InboundMessage, Mention};
pub use lark::{LarkClient, LarkPlatform};
pub use thread::ThreadFetcher;
pub use traits::{ChatMessage, MessageBody, MessageGateway};
