pub mod api;
pub mod talk;
pub mod webhooks;
