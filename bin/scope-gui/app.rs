use crossbeam_channel::{unbounded, Receiver, Sender};
use eframe::egui;
use egui_plot::{Legend, Line, Plot, PlotPoints};
use log::LevelFilter;
use sds_scope::hooks::HOOK_COUNT;
use sds_scope::{
    load_config, AppConfig, HookOutcome, PlotData, ScopeApp, TDIV_LEVELS, VDIV_LEVELS,
};
use std::path::Path;
use std::time::Duration;

const MAX_LOG_LINES: usize = 500;

// ============================================================================
// Tee Writer - sends env_logger output to both stderr and GUI channel
// ============================================================================

struct TeeWriter {
    sender: Sender<String>,
    stderr: std::io::Stderr,
}

impl std::io::Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.stderr.write_all(buf)?;
        if let Ok(s) = std::str::from_utf8(buf) {
            let trimmed = s.trim_end_matches('\n');
            if !trimmed.is_empty() {
                let _ = self.sender.try_send(trimmed.to_string());
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.stderr.flush()
    }
}

pub fn init_logging(level: LevelFilter) -> Receiver<String> {
    let (tx, rx) = unbounded();
    let writer = TeeWriter {
        sender: tx,
        stderr: std::io::stderr(),
    };

    env_logger::Builder::new()
        .filter_level(level)
        .filter_module("winit", LevelFilter::Off)
        .filter_module("eframe", LevelFilter::Off)
        .filter_module("egui_glow", LevelFilter::Off)
        .filter_module("zbus", LevelFilter::Off)
        .filter_module("tracing", LevelFilter::Off)
        .filter_module("accesskit", LevelFilter::Off)
        .format_timestamp_millis()
        .target(env_logger::Target::Pipe(Box::new(writer)))
        .init();

    rx
}

pub struct ScopeGui {
    app: ScopeApp,

    // Channel settings inputs
    vdiv_input: String,
    tdiv_input: String,

    // Plotting
    with_fft: bool,
    plot: Option<PlotData>,

    // Config load/save paths
    load_path: String,
    save_path: String,

    log_messages: Vec<String>,
    log_receiver: Option<Receiver<String>>,
}

impl ScopeGui {
    pub fn new(_cc: &eframe::CreationContext<'_>, config: AppConfig) -> Self {
        let auto_connect = config.instrument.auto_connect;
        let mut app = ScopeApp::new(config);
        if auto_connect {
            // Failure shows up as "No Scope!" and in the message line
            let _ = app.connect();
        }

        Self {
            app,
            vdiv_input: String::new(),
            tdiv_input: String::new(),
            with_fft: false,
            plot: None,
            load_path: String::new(),
            save_path: String::new(),
            log_messages: Vec::new(),
            log_receiver: None,
        }
    }

    pub fn set_log_receiver(&mut self, receiver: Receiver<String>) {
        self.log_receiver = Some(receiver);
    }

    fn drain_log(&mut self) {
        if let Some(rx) = &self.log_receiver {
            self.log_messages.extend(rx.try_iter());
        }
        if self.log_messages.len() > MAX_LOG_LINES {
            let excess = self.log_messages.len() - MAX_LOG_LINES;
            self.log_messages.drain(..excess);
        }
    }

    fn load_config_from_file(&mut self) {
        let config_path = Path::new(&self.load_path);
        if !config_path.exists() {
            self.log_messages.push(format!("Config file {} not found", self.load_path));
            return;
        }
        match load_config(Some(config_path)) {
            Ok(config) => match self.app.set_config(config) {
                Ok(()) => self.log_messages.push("Config loaded".to_string()),
                Err(e) => self.log_messages.push(format!("Invalid config: {e}")),
            },
            Err(e) => self.log_messages.push(format!("Failed to load: {e}")),
        }
    }

    fn save_config_to_file(&mut self) {
        let save_path = if self.save_path.to_lowercase().ends_with(".toml") {
            self.save_path.clone()
        } else {
            format!("{}.toml", self.save_path)
        };

        match toml::to_string_pretty(self.app.config()) {
            Ok(toml_str) => {
                if let Err(e) = std::fs::write(&save_path, toml_str) {
                    self.log_messages.push(format!("Write failed: {e}"));
                } else {
                    self.log_messages.push(format!("Config saved to {save_path}"));
                    self.save_path = save_path;
                }
            }
            Err(e) => self.log_messages.push(format!("Serialize failed: {e}")),
        }
    }

    fn render_status(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            let status = self.app.status();
            let color = if status.is_connected() {
                egui::Color32::GREEN
            } else {
                egui::Color32::RED
            };
            ui.colored_label(color, egui::RichText::new(status.label()).strong().size(16.0));
            ui.label(self.app.config().instrument.resource.as_str());

            if status.is_connected() {
                if ui.button("Disconnect").clicked() {
                    self.app.disconnect();
                }
            } else if ui.button("Connect").clicked() {
                let _ = self.app.connect();
            }
        });

        if let Some(message) = self.app.message() {
            if message.is_error() {
                ui.colored_label(egui::Color32::RED, message.text.as_str());
            } else {
                ui.colored_label(egui::Color32::GREEN, message.text.as_str());
            }
        }
    }

    fn render_channel_settings(&mut self, ui: &mut egui::Ui) {
        ui.heading(format!("Channel {}", self.app.config().instrument.channel));
        egui::Frame::group(ui.style()).show(ui, |ui| {
            let shown = self.app.displayed();
            egui::Grid::new("channel_settings")
                .num_columns(3)
                .spacing([10.0, 6.0])
                .show(ui, |ui| {
                    ui.label("Volts/div:");
                    ui.label(shown.volts_per_div_label());
                    level_input(ui, "vdiv_levels", &mut self.vdiv_input, &VDIV_LEVELS);
                    ui.end_row();

                    ui.label("Time/div:");
                    ui.label(shown.time_per_div_label());
                    level_input(ui, "tdiv_levels", &mut self.tdiv_input, &TDIV_LEVELS);
                    ui.end_row();
                });

            if ui.button("Update").clicked() {
                let _ = self.app.update_scale(&self.vdiv_input, &self.tdiv_input);
            }
        });
    }

    fn render_file_io(&mut self, ui: &mut egui::Ui) {
        ui.heading("File I/O");
        egui::Frame::group(ui.style()).show(ui, |ui| {
            ui.horizontal(|ui| {
                ui.label("Folder:");
                ui.monospace(self.app.save_dir().display().to_string());
                if ui.button("Change...").clicked() {
                    if let Some(dir) = rfd::FileDialog::new()
                        .set_directory(self.app.save_dir())
                        .pick_folder()
                    {
                        let _ = self.app.change_folder(&dir);
                    }
                }
            });

            ui.horizontal(|ui| {
                ui.label("Filename:");
                ui.add_enabled(
                    !self.app.use_timestamp,
                    egui::TextEdit::singleline(&mut self.app.custom_filename).desired_width(200.0),
                );
                ui.checkbox(&mut self.app.use_timestamp, "Default (timestamp)");
            });

            if ui.button("Acquire Trace").clicked() {
                let _ = self.app.acquire_and_save();
            }
            if let Some(path) = self.app.last_trace_path() {
                ui.colored_label(egui::Color32::GRAY, format!("Last: {}", path.display()));
            }
        });

        ui.add_space(8.0);
        ui.horizontal(|ui| {
            if ui.button("Plot Trace").clicked() {
                if let Some(path) = rfd::FileDialog::new()
                    .add_filter("CSV", &["csv"])
                    .set_directory(self.app.save_dir())
                    .pick_file()
                {
                    if let Ok(plot) = self.app.plot_file(&path, self.with_fft) {
                        self.plot = Some(plot);
                    }
                }
            }
            if ui
                .add_enabled(self.app.last_trace().is_some(), egui::Button::new("Plot Last"))
                .clicked()
            {
                if let Ok(plot) = self.app.plot_last(self.with_fft) {
                    self.plot = Some(plot);
                }
            }
            ui.checkbox(&mut self.with_fft, "w/ FFT?");
        });
    }

    fn render_hooks(&mut self, ui: &mut egui::Ui) {
        ui.heading("Functions");
        ui.horizontal(|ui| {
            for index in 0..HOOK_COUNT {
                let Some(slot) = self.app.hooks().get(index) else {
                    continue;
                };
                let (label, name) = (slot.label.clone(), slot.name.clone());
                if ui.button(label).on_hover_text(name).clicked() {
                    if let Ok(HookOutcome::Fitted(_)) = self.app.run_hook(index) {
                        self.vdiv_input.clear();
                        self.tdiv_input.clear();
                    }
                }
            }
        });
    }

    fn render_config(&mut self, ui: &mut egui::Ui) {
        ui.collapsing("Configuration", |ui| {
            ui.horizontal(|ui| {
                ui.label("Load from:");
                ui.add(egui::TextEdit::singleline(&mut self.load_path).desired_width(220.0));
                if ui.button("Browse...").clicked() {
                    if let Some(path) = rfd::FileDialog::new()
                        .add_filter("TOML", &["toml"])
                        .pick_file()
                    {
                        self.load_path = path.display().to_string();
                    }
                }
                if ui.add_enabled(!self.load_path.is_empty(), egui::Button::new("Load")).clicked() {
                    self.load_config_from_file();
                }
            });

            ui.horizontal(|ui| {
                ui.label("Save to:");
                ui.add(egui::TextEdit::singleline(&mut self.save_path).desired_width(220.0));
                if ui.button("Browse...").clicked() {
                    if let Some(path) = rfd::FileDialog::new()
                        .add_filter("TOML", &["toml"])
                        .save_file()
                    {
                        self.save_path = path.display().to_string();
                    }
                }
                if ui.add_enabled(!self.save_path.is_empty(), egui::Button::new("Save")).clicked() {
                    self.save_config_to_file();
                }
            });
        });
    }

    fn render_log(&mut self, ui: &mut egui::Ui) {
        ui.label("Activity Log");
        egui::Frame::group(ui.style()).show(ui, |ui| {
            egui::ScrollArea::vertical()
                .max_height(160.0)
                .stick_to_bottom(true)
                .show(ui, |ui| {
                    ui.set_min_width(280.0);
                    for msg in &self.log_messages {
                        ui.label(egui::RichText::new(msg).monospace().size(11.0));
                    }
                    if self.log_messages.is_empty() {
                        ui.colored_label(egui::Color32::GRAY, "No activity yet");
                    }
                });
        });
        if ui.button("Clear Log").clicked() {
            self.log_messages.clear();
        }
    }

    fn render_plots(&self, ui: &mut egui::Ui) {
        let Some(data) = &self.plot else {
            ui.colored_label(egui::Color32::GRAY, "Nothing plotted yet");
            return;
        };

        ui.label(egui::RichText::new(data.title.as_str()).strong());
        let height = if data.spectrum.is_some() {
            ui.available_height() / 2.0 - 20.0
        } else {
            ui.available_height() - 10.0
        };

        Plot::new("time_plot")
            .height(height)
            .legend(Legend::default())
            .x_axis_label("Time (s)")
            .y_axis_label("Voltage (V)")
            .show(ui, |plot_ui| {
                plot_ui.line(Line::new("Voltage", PlotPoints::from(data.time_domain.clone())));
            });

        if let Some(spectrum) = &data.spectrum {
            if let Some(peak) = data.peak_frequency {
                ui.label(format!("Peak at {peak:.3} Hz"));
            }
            let points: Vec<[f64; 2]> = spectrum.points().map(|(f, m)| [f, m]).collect();
            Plot::new("fft_plot")
                .height(height)
                .legend(Legend::default())
                .x_axis_label("Frequency (Hz)")
                .y_axis_label("Amplitude (V)")
                .show(ui, |plot_ui| {
                    plot_ui.line(Line::new("Amplitude", PlotPoints::from(points)));
                });
        }
    }
}

/// Free-text entry plus a drop-down of the instrument's standard levels.
fn level_input(ui: &mut egui::Ui, id: &str, value: &mut String, levels: &[&str]) {
    ui.horizontal(|ui| {
        ui.add(egui::TextEdit::singleline(value).desired_width(90.0));
        egui::ComboBox::from_id_salt(id)
            .selected_text("levels")
            .show_ui(ui, |ui| {
                for level in levels {
                    ui.selectable_value(value, level.to_string(), *level);
                }
            });
    });
}

impl eframe::App for ScopeGui {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_log();
        ctx.request_repaint_after(Duration::from_millis(200));

        egui::SidePanel::left("controls")
            .resizable(true)
            .min_width(360.0)
            .show(ctx, |ui| {
                egui::ScrollArea::vertical().show(ui, |ui| {
                    ui.heading("Siglent SDS 1104X-E");
                    ui.add_space(5.0);
                    self.render_status(ui);
                    ui.separator();
                    self.render_channel_settings(ui);
                    ui.add_space(8.0);
                    self.render_file_io(ui);
                    ui.add_space(8.0);
                    self.render_hooks(ui);
                    ui.separator();
                    self.render_config(ui);
                    ui.separator();
                    self.render_log(ui);
                });
            });

        egui::CentralPanel::default().show(ctx, |ui| {
            self.render_plots(ui);
        });
    }
}
