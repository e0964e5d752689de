//! Backend for the handyman-services website: relays form submissions to
//! Telegram, Telnyx SMS and Supabase.

pub mod ai;
pub mod app;
pub mod config;
pub mod error;
pub mod requests;
pub mod sms;
pub mod storage;
pub mod supabase;
pub mod telegram;
pub mod types;
