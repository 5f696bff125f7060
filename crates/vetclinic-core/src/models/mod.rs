//! Data models shared by the session store and the API clients.
//!
//! - `User`, `Role`: the authenticated identity and its role set
//! - `Page`: list responses, paginated or bare

pub mod page;
pub mod user;

pub use page::Page;
pub use user::{Role, User};
