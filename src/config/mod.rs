pub mod schema;

pub use schema::{CompletionConfig, Config, GatewayConfig, LarkConfig, RelayConfig};
