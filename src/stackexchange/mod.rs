mod client;

pub use client::StackExchangeClient;
