pub mod telegram;
pub mod tgtg;
pub mod types;

pub use telegram::{ChatDelivery, TelegramClient};
pub use tgtg::{MarketplaceApi, TgtgClient};
pub use types::*;
