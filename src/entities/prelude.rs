pub use super::crypto_prices::Entity as CryptoPrices;
pub use super::sync_status::Entity as SyncStatus;
