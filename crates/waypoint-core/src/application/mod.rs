//! Application services - dispatch, status tracking, module registration

/// Step request dispatch
pub mod dispatcher;

/// Module self-registration
pub mod module_loader;

/// Durable status tracking
pub mod status_manager;
