use std::path::PathBuf;
use std::sync::mpsc::Receiver;

use egui::Color32;
use egui_file_dialog::FileDialog;
use egui_plot::{Line, Plot};

use crate::analyzer::UnitSummary;
use crate::config::SortingForm;
use crate::error::PipelineError;
use crate::pipeline::{self, SortingReport};
use crate::sorter::TemplateSorter;

#[derive(PartialEq, Clone, Copy, Debug)]
enum DialogKind {
    Info,
    Error,
}

struct Dialog {
    kind: DialogKind,
    message: String,
}

impl Dialog {
    fn error(message: impl Into<String>) -> Self {
        Self {
            kind: DialogKind::Error,
            message: message.into(),
        }
    }

    fn info(message: impl Into<String>) -> Self {
        Self {
            kind: DialogKind::Info,
            message: message.into(),
        }
    }
}

type SortingResult = Result<SortingReport, PipelineError>;

#[derive(serde::Deserialize, serde::Serialize)]
#[serde(default)]
pub struct SortingApp {
    form: SortingForm,
    #[serde(skip)]
    file_dialog: FileDialog,
    #[serde(skip)]
    sorting_receiver: Option<Receiver<SortingResult>>,
    #[serde(skip)]
    report: Option<SortingReport>,
    #[serde(skip)]
    dialog: Option<Dialog>,
    #[serde(skip)]
    selected_unit: usize,
    max_waveforms_shown: usize,
    waveform_color: Color32,
    template_color: Color32,
}

impl Default for SortingApp {
    fn default() -> Self {
        Self {
            form: SortingForm::default(),
            file_dialog: FileDialog::new(),
            sorting_receiver: None,
            report: None,
            dialog: None,
            selected_unit: 0,
            max_waveforms_shown: 100,
            waveform_color: Color32::from_rgba_unmultiplied(160, 160, 160, 60),
            template_color: Color32::from_rgb(255, 127, 14),
        }
    }
}

impl SortingApp {
    /// Called once before the first frame.
    pub fn new(cc: &eframe::CreationContext<'_>) -> Self {
        // Load previous app state (if any).
        // Note that you must enable the `persistence` feature for this to work.
        if let Some(storage) = cc.storage {
            eframe::get_value(storage, eframe::APP_KEY).unwrap_or_default()
        } else {
            Default::default()
        }
    }

    /// Validates the form and starts a sorting run on a worker thread.
    fn start_sorting(&mut self) {
        let config = match self.form.to_config() {
            Ok(config) => config,
            Err(e) => {
                log::warn!("Invalid sorting form: {e}");
                self.dialog = Some(Dialog::error(e.to_string()));
                return;
            }
        };

        let (sender, receiver) = std::sync::mpsc::channel();
        self.sorting_receiver = Some(receiver);
        self.report = None;
        self.selected_unit = 0;

        std::thread::spawn(move || {
            let result = pipeline::run_spike_sorting(&config, &TemplateSorter::default());
            let _ = sender.send(result);
        });
    }

    fn poll_sorting(&mut self) {
        let Some(receiver) = &self.sorting_receiver else {
            return;
        };
        match receiver.try_recv() {
            Ok(Ok(report)) => {
                log::info!("Sorting finished: {} units", report.sorting.units.len());
                self.dialog = Some(Dialog::info(format!(
                    "Spike sorting completed and data saved to '{}'",
                    report.output_path.display()
                )));
                self.report = Some(report);
                self.sorting_receiver = None;
            }
            Ok(Err(e)) => {
                log::error!("Spike sorting failed: {e}");
                self.dialog = Some(Dialog::error(format!("An error occurred: {e}")));
                self.sorting_receiver = None;
            }
            Err(std::sync::mpsc::TryRecvError::Empty) => {
                // Still sorting
            }
            Err(std::sync::mpsc::TryRecvError::Disconnected) => {
                log::error!("Sorting thread disconnected");
                self.dialog = Some(Dialog::error(
                    "An error occurred: sorting thread stopped unexpectedly",
                ));
                self.sorting_receiver = None;
            }
        }
    }

    fn parameter_grid(&mut self, ui: &mut egui::Ui) {
        let form = &mut self.form;
        egui::Grid::new("parameters")
            .num_columns(2)
            .spacing([12.0, 6.0])
            .show(ui, |ui| {
                let row = |ui: &mut egui::Ui, label: &str, value: &mut String| {
                    ui.label(label);
                    ui.add(egui::TextEdit::singleline(value).desired_width(260.0));
                    ui.end_row();
                };
                row(ui, "SNR Ratio:", &mut form.snr_ratio);
                row(ui, "Detect Sign:", &mut form.detect_sign);
                row(ui, "Phase1 Detect Threshold:", &mut form.phase1_detect_threshold);
                row(ui, "Detect Threshold:", &mut form.detect_threshold);
                row(ui, "Channel Radius:", &mut form.channel_radius);
                row(ui, "Time Radius (msec):", &mut form.time_radius_msec);
                row(ui, "Block Duration (sec):", &mut form.block_duration_sec);
                row(ui, "Detect Channel Radius:", &mut form.detect_channel_radius);
                row(ui, "Detect Time Radius (msec):", &mut form.detect_time_radius_msec);
                row(ui, "Channel Locations (x,y; ...):", &mut form.channel_locations);
                row(ui, "Channel:", &mut form.channel_id);
                row(ui, "Output File:", &mut form.output_path);
                row(ui, "Plot Folder:", &mut form.plot_dir);
            });
    }

    fn unit_plots(&self, ui: &mut egui::Ui, summary: &UnitSummary) {
        let times = summary.time_axis_ms();
        let span = times.last().copied().unwrap_or_default()
            - times.first().copied().unwrap_or_default();
        let x_of = |ch: usize, t: f64| t + ch as f64 * span * 1.2;

        ui.columns(2, |columns| {
            columns[0].label(format!("Spike Waveforms for Unit {}", summary.unit_id));
            Plot::new(("waveforms", summary.unit_id))
                .height(320.0)
                .show(&mut columns[0], |plot_ui| {
                    for (i, waveform) in summary
                        .waveforms
                        .outer_iter()
                        .take(self.max_waveforms_shown)
                        .enumerate()
                    {
                        for ch in 0..waveform.ncols() {
                            let points: Vec<[f64; 2]> = times
                                .iter()
                                .zip(waveform.column(ch))
                                .map(|(&t, &v)| [x_of(ch, t), f64::from(v)])
                                .collect();
                            plot_ui.line(
                                Line::new(format!("wf_{i}_{ch}"), points)
                                    .color(self.waveform_color),
                            );
                        }
                    }
                });

            columns[1].label(format!("Spike Template for Unit {}", summary.unit_id));
            Plot::new(("template", summary.unit_id))
                .height(320.0)
                .show(&mut columns[1], |plot_ui| {
                    for ch in 0..summary.template.ncols() {
                        let points: Vec<[f64; 2]> = times
                            .iter()
                            .zip(summary.template.column(ch))
                            .map(|(&t, &v)| [x_of(ch, t), f64::from(v)])
                            .collect();
                        plot_ui.line(
                            Line::new(format!("template_{ch}"), points)
                                .color(self.template_color)
                                .width(2.0),
                        );
                    }
                });
        });
    }

    fn show_dialog(&mut self, ctx: &egui::Context) {
        let Some(dialog) = &self.dialog else {
            return;
        };
        let title = match dialog.kind {
            DialogKind::Info => "Success",
            DialogKind::Error => "Error",
        };
        let mut close = false;
        egui::Window::new(title)
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, [0.0, 0.0])
            .show(ctx, |ui| {
                ui.label(&dialog.message);
                if ui.button("OK").clicked() {
                    close = true;
                }
            });
        if close {
            self.dialog = None;
        }
    }
}

impl eframe::App for SortingApp {
    /// Called by the framework to save state before shutdown.
    fn save(&mut self, storage: &mut dyn eframe::Storage) {
        eframe::set_value(storage, eframe::APP_KEY, self);
    }

    /// Called each time the UI needs repainting, which may be many times per second.
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.poll_sorting();

        egui::TopBottomPanel::top("top_panel").show(ctx, |ui| {
            egui::MenuBar::new().ui(ui, |ui| {
                ui.menu_button("File", |ui| {
                    if ui.button("Quit").clicked() {
                        ctx.send_viewport_cmd(egui::ViewportCommand::Close);
                    }
                });
                ui.add_space(16.0);

                egui::widgets::global_theme_preference_buttons(ui);
            });
        });

        if let Some(report) = &self.report {
            egui::SidePanel::right("units_panel")
                .min_width(250.0)
                .show(ctx, |ui| {
                    ui.heading("Sorted units");
                    ui.label(format!("Recording start: {:.9} s", report.start_time_sec));
                    ui.label(format!("Saved to {}", report.output_path.display()));
                    ui.separator();

                    for (i, summary) in report.summaries.iter().enumerate() {
                        let text =
                            format!("Unit {} ({} spikes)", summary.unit_id, summary.num_spikes);
                        ui.selectable_value(&mut self.selected_unit, i, text);
                    }
                    if report.summaries.is_empty() {
                        ui.label("No units found");
                    }

                    ui.separator();
                    ui.heading("Plot tools");
                    ui.add(
                        egui::Slider::new(&mut self.max_waveforms_shown, 1..=500)
                            .text("Waveforms shown"),
                    );
                    ui.label("Waveform color:");
                    egui::color_picker::color_edit_button_srgba(
                        ui,
                        &mut self.waveform_color,
                        egui::color_picker::Alpha::BlendOrAdditive,
                    );
                    ui.label("Template color:");
                    egui::color_picker::color_edit_button_srgba(
                        ui,
                        &mut self.template_color,
                        egui::color_picker::Alpha::Opaque,
                    );
                });
        }

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("Spike Sorting");

            ui.horizontal(|ui| {
                ui.label("Open Ephys Folder:");
                ui.add(
                    egui::TextEdit::singleline(&mut self.form.recording_dir)
                        .desired_width(260.0),
                );
                if ui.button("Browse").clicked() {
                    self.file_dialog.pick_directory();
                }
            });
            self.file_dialog.update(ctx);

            // Check if the user picked a folder.
            if let Some(path) = self.file_dialog.take_picked() {
                self.form.recording_dir = path.display().to_string();
            }

            ui.separator();
            self.parameter_grid(ui);
            ui.separator();

            let running = self.sorting_receiver.is_some();
            ui.horizontal(|ui| {
                if ui.add_enabled(!running, egui::Button::new("Run Spike Sorting")).clicked() {
                    self.start_sorting();
                }
                if ui.button("Reset parameters").clicked() {
                    let recording_dir = std::mem::take(&mut self.form.recording_dir);
                    self.form = SortingForm { recording_dir, ..SortingForm::default() };
                }
            });
            if running {
                ui.horizontal(|ui| {
                    ui.spinner();
                    ui.label("Sorting...");
                });
            }

            if let Some(report) = &self.report {
                ui.separator();
                match report.summaries.get(self.selected_unit) {
                    Some(summary) => self.unit_plots(ui, summary),
                    None => {
                        ui.label("No data available to plot");
                    }
                }
                if !report.plots.is_empty() {
                    let folder = report.plots[0].parent().map(PathBuf::from).unwrap_or_default();
                    ui.label(format!(
                        "{} figures saved in {}",
                        report.plots.len(),
                        folder.display()
                    ));
                }
            }

            ui.with_layout(egui::Layout::bottom_up(egui::Align::LEFT), |ui| {
                powered_by_egui_and_eframe(ui);
                egui::warn_if_debug_build(ui);
            });
        });

        self.show_dialog(ctx);
    }
}

fn powered_by_egui_and_eframe(ui: &mut egui::Ui) {
    ui.horizontal(|ui| {
        ui.spacing_mut().item_spacing.x = 0.0;
        ui.label("Powered by ");
        ui.hyperlink_to("egui", "https://github.com/emilk/egui");
        ui.label(" and ");
        ui.hyperlink_to(
            "eframe",
            "https://github.com/emilk/egui/tree/master/crates/eframe",
        );
        ui.label(".");
    });
}
