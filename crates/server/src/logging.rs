use std::sync::Once;

use tracing_subscriber::{
    filter::{FilterFn, LevelFilter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Installs the global subscriber. Only our own crates are logged.
pub fn init(verbose: bool) {
    static LOGGING_SETUP: Once = Once::new();

    LOGGING_SETUP.call_once(|| {
        let level = if verbose {
            LevelFilter::DEBUG
        } else {
            LevelFilter::INFO
        };
        let filter = FilterFn::new(|metadata| {
            metadata
                .module_path()
                .unwrap_or_default()
                .starts_with("geotrace")
        });

        tracing_subscriber::registry()
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .with(filter)
            .with(level)
            .init();
    })
}
