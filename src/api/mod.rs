pub mod accounts;
pub mod auth;
pub mod cycles;
pub mod notifications;
pub mod oauth;
pub mod payments;
pub mod webhooks;
