//! Both emission styles feeding one pipeline: a structured logger with
//! bound context and plain `tracing` macros. Writes `logs/app.log` and
//! `logs/app.json.log`; error reports are discarded by the `noop://`
//! collector unless `COLLECTOR_DSN` points elsewhere.

use std::fmt;

use tracing::{error, info};
use tracing_dual_sink::config::PipelineConfig;
use tracing_dual_sink::init::init_logging_with_config;

#[derive(Debug)]
struct DivisionByZero;

impl fmt::Display for DivisionByZero {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("attempt to divide by zero")
    }
}

impl std::error::Error for DivisionByZero {}

fn divide(a: i64, b: i64) -> Result<i64, DivisionByZero> {
    if b == 0 {
        Err(DivisionByZero)
    } else {
        Ok(a / b)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = PipelineConfig::from_lookup(|key| {
        std::env::var(key)
            .ok()
            .or_else(|| (key == "COLLECTOR_DSN").then(|| "noop://".to_string()))
    })?;
    let handle = init_logging_with_config(&config)?;

    for mode in ["structured", "tracing"] {
        if mode == "structured" {
            let log = handle.logger("app").bind("mode", mode);
            log.info("home requested").emit();
            for n in 1..=3 {
                log.info("breadcrumb %d").args([n]).emit();
            }
            if let Err(err) = divide(1, 0) {
                log.exception("we divided by zero and handled it", &err).emit();
            }
        } else {
            info!(target: "app", mode, "home requested");
            for n in 1..=3 {
                info!(target: "app", mode, "breadcrumb {}", n);
            }
            if let Err(err) = divide(1, 0) {
                error!(target: "app", mode, error = &err as &(dyn std::error::Error + 'static), "we divided by zero and handled it");
            }
        }
    }

    handle.pipeline().flush();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    println!("stats: {:?}, collector: {:?}", handle.pipeline().stats(), handle.forwarder().stats());
    Ok(())
}
