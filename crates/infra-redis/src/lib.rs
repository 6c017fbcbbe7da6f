// Fakturace Infrastructure - Redis Adapter
// Implements: Broker (distributed queue backend)

mod broker;
mod error;
mod keys;

pub use broker::RedisBroker;
pub use keys::QueueKeys;
