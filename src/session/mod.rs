// Session module
// Holds the client-side credentials and keeps them fresh

mod manager;
mod redirect;
mod refresh;
mod store;
mod types;

pub use manager::{is_expiring_soon, SessionManager};
pub use redirect::{LoginRedirect, TracingRedirect};
pub use store::{
    MemoryStore, SessionStore, SqliteStore, ACCESS_TOKEN_KEY, EXPIRES_AT_KEY, REFRESH_TOKEN_KEY,
    SESSION_KEYS, USER_KEY,
};
pub use types::{SessionGrant, SessionSettings, UserId, UserProfile};
