// Copyright (c) 2024 Manifold contributors
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.
use manifold::logging::log_crate_sink;
use manifold::{Mode, Server};
use serde::Deserialize;
use slog::Drain;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct AppConfig {
    host: String,
    port: u16,
    mode: String,
    backends: Vec<String>,
    #[serde(default = "default_log_level")]
    log_level: String,
}

fn default_log_level() -> String { "info".to_owned() }

fn load_config() -> Result<AppConfig, config::ConfigError> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("manifold").required(false))
        .add_source(config::Environment::with_prefix("MANIFOLD"))
        .build()?;
    settings.try_deserialize()
}

/// Wires up `slog` with an async, terminal-formatted drain and installs it as
/// the process's `log` facade, so that both our own `Logger` and any
/// dependency's bare `log::warn!`/`log::error!` calls land in the same place.
fn init_logging(level: &str) -> slog_scope::GlobalLoggerGuard {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    let level = match level.to_lowercase().as_str() {
        "trace" => slog::Level::Trace,
        "debug" => slog::Level::Debug,
        "warn" => slog::Level::Warning,
        "error" => slog::Level::Error,
        _ => slog::Level::Info,
    };
    let drain = slog::LevelFilter::new(drain, level).fuse();

    let logger = slog::Logger::root(drain, slog::o!());
    let guard = slog_scope::set_global_logger(logger);
    slog_stdlog::init().expect("failed to install slog as the log facade");
    guard
}

fn parse_mode(s: &str) -> Option<Mode> {
    match s.to_lowercase().as_str() {
        "socks" => Some(Mode::Socks),
        "tunnel" => Some(Mode::Tunnel),
        _ => None,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = match load_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("configuration error: {}", e);
            return ExitCode::FAILURE;
        },
    };

    let _log_guard = init_logging(&config.log_level);

    let mode = match parse_mode(&config.mode) {
        Some(mode) => mode,
        None => {
            log::error!("unknown mode {:?}, expected \"socks\" or \"tunnel\"", config.mode);
            return ExitCode::FAILURE;
        },
    };

    let server = Arc::new(Server::new());
    let logger = log_crate_sink();

    if let Err(e) = server.start(&config.host, config.port, mode, &config.backends, logger).await {
        log::error!("failed to start: {}", e);
        return ExitCode::FAILURE;
    }

    log::info!("listening on {}:{} in {:?} mode", config.host, config.port, mode);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        let server = server.clone();
        tokio::spawn(async move {
            let _ = tokio::signal::ctrl_c().await;
            shutdown.store(true, Ordering::SeqCst);
            server.stop();
        });
    }

    while server.is_running() {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }

    // Give in-flight flows a moment to drain before the process exits.
    while server.active_conns() > 0 {
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    }

    ExitCode::SUCCESS
}
