//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod aes_secret_encryptor;
mod in_memory_attempt_store;
mod in_memory_secret_store;
mod postgres_attempt_store;
mod postgres_secret_store;
mod redis_attempt_store;
mod totp_provider;

pub use aes_secret_encryptor::AesSecretEncryptor;
pub use in_memory_attempt_store::InMemoryAttemptStore;
pub use in_memory_secret_store::InMemorySecretStore;
pub use postgres_attempt_store::PostgresAttemptStore;
pub use postgres_secret_store::PostgresSecretStore;
pub use redis_attempt_store::RedisAttemptStore;
pub use totp_provider::TotpRsProvider;
