/// Middleware module
///
/// Session authentication for protected routes.

mod session_required;

pub use session_required::SessionRequired;
