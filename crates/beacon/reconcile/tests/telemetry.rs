//! Global subscriber installation. Kept in its own test binary since the
//! subscriber is process-wide.

use beacon_reconcile::telemetry::init_tracing;
use beacon_reconcile::LoggingConfig;

#[test]
fn second_init_is_rejected() {
    let config = LoggingConfig {
        level: "debug".to_string(),
        json: true,
    };
    assert!(init_tracing(&config).is_ok());
    assert!(init_tracing(&LoggingConfig::default()).is_err());
    tracing::info!("subscriber installed");
}
