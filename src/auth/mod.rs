pub mod tenant_token;

pub use tenant_token::{Credential, TenantTokenCache, TOKEN_REFRESH_MARGIN_SECS};
