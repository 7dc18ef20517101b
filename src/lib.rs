//! Generation dispatch and entitlement engine for an AI assistant bot.
//!
//! Tracks per-user trial and subscription quotas, picks an image model
//! from the operator-curated catalog, calls the paid and free provider
//! backends with retry/fallback, and screens results through a vision
//! content guard before delivery.

pub mod catalog;
pub mod dispatch;
pub mod error;
pub mod guard;
pub mod ledger;
pub mod models;
pub mod policy;
pub mod prompts;
pub mod provider;
pub mod store;

pub use error::{Error, Result};
