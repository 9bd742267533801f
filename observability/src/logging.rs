//! Process-wide logging setup shared by every binary embedding the
//! cluster machinery.

use std::io::IsTerminal;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{info, Level};
use tracing_subscriber::filter::{FilterFn, LevelFilter};
use tracing_subscriber::layer::{Layer, SubscriberExt};

// Quiet down some libs.
fn should_log(module_path: Option<&str>) -> bool {
    if let Some(module) = module_path {
        let module = module.split_once("::").map(|(l, _)| l).unwrap_or(module);
        if matches!(module, "h2" | "hyper" | "mio" | "reqwest" | "rustls" | "want") {
            return false;
        }
    }
    true
}

pub struct Options {
    pub process_name: String,
    pub default_log_level: Level,
}

pub fn configure(service_name: &str) {
    configure_with_options(Options {
        process_name: service_name.to_owned(),
        default_log_level: Level::INFO,
    })
}

pub fn configure_with_options(options: Options) {
    let log_level = std::env::var("LOGLEVEL")
        .map(|s| match Level::from_str(&s) {
            Ok(level) => level,
            Err(e) => panic!("failed to parse LOGLEVEL: {e}"),
        })
        .unwrap_or(options.default_log_level);

    let terminal = tracing_subscriber::fmt::layer()
        .with_file(true)
        .with_line_number(true)
        .with_target(false);

    let terminal = if std::io::stdout().is_terminal() {
        terminal.boxed()
    } else {
        terminal.json().boxed()
    };

    let subscriber = tracing_subscriber::registry()
        .with(terminal.with_filter(LevelFilter::from_level(log_level)))
        .with(FilterFn::new(|metadata| {
            should_log(metadata.module_path())
        }));

    tracing::subscriber::set_global_default(subscriber).unwrap();

    info!(
        process = options.process_name,
        max_level = %log_level,
        "initialized logging to terminal. you can set verbosity with env var LOGLEVEL."
    );
}

/// Rate limiter for a log statement that can fire on every event in a busy
/// loop, like a store write failing while the store is down.
///
/// `ok()` returns `Some(suppressed)` when the caller should go ahead and
/// log (with `suppressed` counting the calls swallowed since the last
/// time), or `None` when the statement should be skipped.
pub struct Spew {
    state: Mutex<Option<SpewState>>,
    interval: Duration,
}

struct SpewState {
    last_logged: Instant,
    suppressed: usize,
}

impl Spew {
    pub const fn new() -> Self {
        Spew::with_interval(Duration::from_secs(30))
    }

    pub const fn with_interval(interval: Duration) -> Self {
        Spew {
            state: Mutex::new(None),
            interval,
        }
    }

    pub fn ok(&self) -> Option<usize> {
        let now = Instant::now();
        let mut locked = self.state.lock().unwrap();
        match locked.as_mut() {
            None => {
                *locked = Some(SpewState {
                    last_logged: now,
                    suppressed: 0,
                });
                Some(0)
            }
            Some(state) => {
                if now.duration_since(state.last_logged) >= self.interval {
                    let suppressed = state.suppressed;
                    state.last_logged = now;
                    state.suppressed = 0;
                    Some(suppressed)
                } else {
                    state.suppressed += 1;
                    None
                }
            }
        }
    }
}

impl Default for Spew {
    fn default() -> Self {
        Spew::new()
    }
}
