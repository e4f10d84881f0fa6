//! HTTP server wiring (SPEC_FULL §E.3): axum router construction, the
//! shared [`AppState`], and the routes module. HTTP framework/routing is
//! deliberately out of core scope per spec, but a runnable service needs
//! something to receive bytes — this is the teacher's `tower-http`-layered
//! axum style, scoped down to this system's three webhook surfaces plus
//! health/readiness.

mod routes;
mod state;

pub use routes::router;
pub use state::AppState;
