#![warn(clippy::unwrap_used)]

pub mod client;
pub mod fcap;
pub mod wire;

pub use client::{ExchangeClient, HttpExchangeClient};
pub use wire::{FrequencyCap, OipRequest, OipResponse, RawAd};
