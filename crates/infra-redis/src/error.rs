// Redis error mapping

use fakturace_core::error::AppError;

pub(crate) fn map_redis_error(e: redis::RedisError) -> AppError {
    if e.is_connection_refusal() || e.is_timeout() || e.is_connection_dropped() {
        return AppError::Broker(format!("Redis unreachable: {}", e));
    }
    AppError::Broker(format!("Redis error: {}", e))
}
