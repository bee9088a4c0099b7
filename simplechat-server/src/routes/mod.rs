/// Routes nested under `/api`.
pub mod api;
/// Liveness check route.
pub mod health;
