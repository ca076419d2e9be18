mod app;
mod backend;
mod crosshair;
mod grid;
mod launch;
mod loader;
mod region;
mod renderer;
mod selection;
mod signing;
mod slices;
mod transform;

fn main() -> eframe::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli_args = std::env::args().skip(1).collect::<Vec<_>>();
    let (config, initial_status) = match launch::parse_launch_config_from_args(&cli_args) {
        Ok(config) => (config, None),
        Err(err) => {
            log::error!("launch arguments rejected: {err}");
            (
                launch::parse_launch_config_from_args(&[]).unwrap_or_default(),
                Some(format!("Launch URL/args error: {err}")),
            )
        }
    };

    let native_options = eframe::NativeOptions {
        viewport: eframe::egui::ViewportBuilder::default()
            .with_inner_size([1440.0, 820.0])
            .with_min_inner_size([900.0, 480.0])
            .with_title("OrthoView"),
        ..Default::default()
    };

    eframe::run_native(
        "OrthoView",
        native_options,
        Box::new(move |_cc| {
            Ok(Box::new(app::OrthoViewerApp::new(
                config.clone(),
                initial_status.clone(),
            )))
        }),
    )
}
