//! Session lifecycle and cookie transport
//!
//! - [`manager`] issues, loads, refreshes and ends sessions through the storage adapter
//!   and binds the current session to the request
//! - [`cookie`] builds the encrypted session and pending-login cookies

pub mod cookie;
pub mod manager;

pub use cookie::{CookieFactory, CookieOptions, PendingLogin, SessionCookie};
pub use manager::{bind_session, session_from_request, SessionManager};
