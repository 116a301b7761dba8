//! Application-style logging wrappers that call sites should look through.

use tracing_dual_sink::logger::Logger;

pub fn report_failure(order_id: u64) {
    tracing::error!(target: "app", order_id, "payment_failed");
}

pub fn warn_stock_low(logger: &Logger) {
    logger.warning("stock_low").field("sku", "A-1").emit();
}
