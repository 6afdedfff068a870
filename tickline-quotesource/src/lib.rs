//! Market-data distribution: a QuoteSource server accepting lines and
//! fanning published ticks out under per-session subscription filters, and
//! a reconnecting QuoteSource client.

pub mod client;
pub mod control;
pub mod error;
pub mod filter;
pub mod server;

pub use client::{ClientConfig, QuoteSourceClient, TickSink};
pub use error::QuoteSourceError;
pub use filter::SubscriptionFilter;
pub use server::{Config as ServerConfig, QuoteSourceServer};
