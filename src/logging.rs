use std::path::Path;

use tracing_core::{Level, LevelFilter};
use tracing_subscriber::filter::filter_fn;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{registry, Layer};

/// If a global tracing subscriber is not already configured, log to stderr and, when a path
/// is given, to a file. With a file, a panic hook pointing at it is added as well.
pub fn install_logger(file_path: Option<&Path>) {
    let file_layer = file_path.map(|file_path| {
        let writer = tracing_appender::rolling::never(
            file_path.parent().unwrap_or_else(|| Path::new(".")),
            file_path.file_name().unwrap_or_else(|| {
                panic!(
                    "The path '{}' to point to a file.",
                    file_path.to_string_lossy()
                )
            }),
        );
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(writer)
            .with_filter(LevelFilter::INFO)
            .with_filter(filter_fn(skip_noisy_modules))
    });
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(LevelFilter::INFO)
        .with_filter(filter_fn(skip_noisy_modules));

    if registry()
        .with(file_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok()
    {
        if let Some(file_path) = file_path {
            update_panic_hook(file_path);
        }
    }
}

fn skip_noisy_modules(meta: &tracing_core::Metadata<'_>) -> bool {
    if let Some(path) = meta.module_path() {
        // The wgpu crate is logging too much, so we skip `info` level.
        if path.starts_with("wgpu") && *meta.level() >= Level::INFO {
            return false;
        }
    }
    true
}

fn update_panic_hook(file_path: &Path) {
    let hook = std::panic::take_hook();
    let file_path = file_path.to_string_lossy().into_owned();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("PANIC => {info}");
        eprintln!(
            "=== PANIC ===\nA fatal error happened, you can check the run logs here => \
             '{file_path}'\n============="
        );
        hook(info);
    }));
}
