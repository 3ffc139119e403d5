mod app;

use app::{init_logging, ScopeGui};
use log::LevelFilter;
use sds_scope::load_config_or_default;
use std::path::PathBuf;

fn main() -> eframe::Result<()> {
    // Optional first argument: configuration file
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config_or_default(config_path.as_deref());

    let level = config
        .console
        .verbosity
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info);
    let log_receiver = init_logging(level);

    let options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([1000.0, 720.0])
            .with_min_inner_size([700.0, 500.0]),
        ..Default::default()
    };

    eframe::run_native(
        "Siglent SDS 1104X-E",
        options,
        Box::new(|cc| {
            let mut gui = ScopeGui::new(cc, config);
            gui.set_log_receiver(log_receiver);
            Ok(Box::new(gui))
        }),
    )
}
