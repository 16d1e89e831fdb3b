// Routing is split by resource family. Every path is owned by exactly one
// module; the user-management router additionally gets the authentication
// middleware layered on in `create_router`.

pub mod auth;
pub mod catalog;
pub mod content;
pub mod users;
