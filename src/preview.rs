//! Debug preview window for annotated frames
//!
//! The producer publishes mirrored, skeleton-annotated frames into a
//! [`frame_slot`](crate::slot::frame_slot); this window shows whichever is
//! newest. Closing the window cancels the session.

use crate::cancel::CancelToken;
use crate::slot::SlotReader;
use eframe::egui;
use std::time::Duration;

pub struct PreviewApp {
    reader: SlotReader,
    cancel: CancelToken,
    texture: Option<egui::TextureHandle>,
    shown: u64,
}

impl PreviewApp {
    pub fn new(reader: SlotReader, cancel: CancelToken) -> Self {
        Self {
            reader,
            cancel,
            texture: None,
            shown: 0,
        }
    }

    fn refresh(&mut self, ctx: &egui::Context) {
        let Some(latest) = self.reader.try_latest() else {
            return;
        };
        if latest.sequence == self.shown {
            return;
        }
        self.shown = latest.sequence;

        let frame = &latest.frame;
        let image = egui::ColorImage::from_rgb([frame.width() as usize, frame.height() as usize], frame.data());
        match &mut self.texture {
            Some(texture) => texture.set(image, egui::TextureOptions::LINEAR),
            None => self.texture = Some(ctx.load_texture("pose-preview", image, egui::TextureOptions::LINEAR)),
        }
    }
}

impl eframe::App for PreviewApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if self.cancel.is_cancelled() {
            ctx.send_viewport_cmd(egui::ViewportCommand::Close);
            return;
        }
        self.refresh(ctx);

        egui::CentralPanel::default().show(ctx, |ui| match &self.texture {
            Some(texture) => {
                ui.image(egui::load::SizedTexture::from_handle(texture));
            }
            None if self.reader.is_closed() => {
                ui.label("Stream finished");
            }
            None => {
                ui.label("Waiting for frames...");
            }
        });

        ctx.request_repaint_after(Duration::from_millis(10));
    }
}

/// Block the calling thread on the preview window until it is closed or
/// `cancel` fires
pub fn run_preview(reader: SlotReader, cancel: CancelToken, size: (u32, u32)) -> eframe::Result<()> {
    let app = PreviewApp::new(reader, cancel.clone());
    let result = eframe::run_native(
        "Body Tracking",
        eframe::NativeOptions {
            viewport: egui::ViewportBuilder::default().with_inner_size([size.0 as f32, size.1 as f32]),
            ..Default::default()
        },
        Box::new(|_cc| Box::new(app)),
    );
    cancel.cancel();
    result
}
