pub mod cli;
pub mod doctor;
pub mod envfile;
pub mod health;
pub mod lifecycle;
pub mod logs;
pub mod onboard;
pub mod paths;
pub mod probe;
pub mod service;
pub mod state;

/// Initialize tracing with a default filter if `RUST_LOG` is unset.
pub fn init_tracing() {
    let default_filter = "genxctl=info";
    let filter_layer = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());

    tracing_subscriber::fmt()
        .with_env_filter(filter_layer)
        .with_target(false)
        .compact()
        .init();
}
