use std::io::Write;

use env_logger::{Builder, Env, Target};
use log::LevelFilter;

/// Logs go to stderr so transcripts and JSON on stdout stay clean.
/// `RUST_LOG` overrides the default filter.
pub fn init_logger() {
    let mut builder = Builder::from_env(Env::default().default_filter_or("stevesroom=info"));
    builder.filter_module("naga", LevelFilter::Warn);
    builder.filter_module("wgpu", LevelFilter::Warn);
    builder.filter_module("winit", LevelFilter::Warn);
    builder.target(Target::Stderr);

    builder.format(|buf, record| {
        let style = buf.default_level_style(record.level());
        let module_path = record.module_path().unwrap_or("<unknown>");
        writeln!(
            buf,
            "[{style}{}{style:#}][{module_path}] {}",
            record.level(),
            record.args()
        )
    });

    let _ = builder.try_init();
}
