pub mod error;
pub mod escrow_service;
pub mod notification_service;
pub mod payment_gateway;
pub mod release_scheduler;
pub mod webhook_reconciler;
