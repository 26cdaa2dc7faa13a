use std::fmt::Debug;

use axum::http::StatusCode;
use tracing_stackdriver::Stackdriver;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

const LOG_MODULES: &[&str] = &["basic_chat", "tower_http"];

fn directives() -> impl Iterator<Item = Directive> {
    LOG_MODULES.iter().filter_map(|module| {
        format!("{}=info", module)
            .parse()
            .map_err(|error| eprintln!("Bad logging directive for {}: {}", module, error))
            .ok()
    })
}

/// Installs the global subscriber. `json` selects Stackdriver output.
pub fn init_logging(json: bool) {
    let env_filter = directives().fold(EnvFilter::default(), EnvFilter::add_directive);

    if json {
        let subscriber = Registry::default()
            .with(Stackdriver::default())
            .with(env_filter);

        if tracing::subscriber::set_global_default(subscriber).is_err() {
            eprintln!("A global logger was already installed.");
        }
        let _ = tracing_log::LogTracer::init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }
}

pub type WebResult<T> = std::result::Result<T, StatusCode>;

pub trait LogError<T> {
    /// Logs a rejected request and answers 400.
    fn log_error_bad_request(self) -> WebResult<T>;
}

impl<T, E> LogError<T> for Result<T, E>
where
    E: Debug,
{
    fn log_error_bad_request(self) -> WebResult<T> {
        self.map_err(|error| {
            tracing::warn!(?error, "Rejected request.");
            StatusCode::BAD_REQUEST
        })
    }
}
