mod client;
mod commands;

pub use client::TelegramClient;
pub use commands::CommandHandler;
