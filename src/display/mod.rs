//! Window surface.
//!
//! Presents the composed console frame on a wgpu surface through egui.
//! The frame is uploaded as an egui texture each redraw and drawn centered
//! and scaled to fit the window.

use std::sync::Arc;

use opencv::core::Mat;
use winit::event::WindowEvent;
use winit::window::Window;

use crate::export::{self, ExportError};

/// Display errors.
#[derive(Debug, thiserror::Error)]
pub enum DisplayError {
    #[error("failed to create surface: {0}")]
    CreateSurface(#[from] wgpu::CreateSurfaceError),
    #[error("no suitable GPU adapter")]
    NoAdapter,
    #[error("failed to create device: {0}")]
    RequestDevice(#[from] wgpu::RequestDeviceError),
    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),
    #[error("frame conversion error: {0}")]
    Frame(#[from] ExportError),
}

/// GPU surface plus the egui state used to draw on it.
pub struct DisplaySurface {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    config: wgpu::SurfaceConfiguration,
    egui_ctx: egui::Context,
    egui_state: egui_winit::State,
    egui_renderer: egui_wgpu::Renderer,
    frame_texture: Option<egui::TextureHandle>,
}

impl DisplaySurface {
    /// Create the surface, pick an adapter and set up egui for `window`.
    pub fn new(window: Arc<Window>) -> Result<Self, DisplayError> {
        let size = window.inner_size();

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance.create_surface(window.clone())?;

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::default(),
            compatible_surface: Some(&surface),
            force_fallback_adapter: false,
        }))
        .ok_or(DisplayError::NoAdapter)?;
        log::info!("Using adapter: {:?}", adapter.get_info().name);

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("Console Device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))?;

        let surface_caps = surface.get_capabilities(&adapter);
        let Some(&first_format) = surface_caps.formats.first() else {
            return Err(DisplayError::NoAdapter);
        };
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .copied()
            .unwrap_or(first_format);

        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &config);

        let egui_ctx = egui::Context::default();
        let egui_state = egui_winit::State::new(
            egui_ctx.clone(),
            egui::ViewportId::ROOT,
            &window,
            Some(window.scale_factor() as f32),
            None,
            None,
        );
        let egui_renderer = egui_wgpu::Renderer::new(&device, surface_format, None, 1, false);

        Ok(Self {
            device,
            queue,
            surface,
            config,
            egui_ctx,
            egui_state,
            egui_renderer,
            frame_texture: None,
        })
    }

    /// Forward a window event to egui. Returns true if egui consumed it.
    pub fn handle_event(&mut self, window: &Window, event: &WindowEvent) -> bool {
        self.egui_state.on_window_event(window, event).consumed
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        self.config.width = width.max(1);
        self.config.height = height.max(1);
        self.surface.configure(&self.device, &self.config);
    }

    fn upload_frame(&mut self, frame: &Mat) -> Result<(), DisplayError> {
        let rgb = export::mat_to_image(frame)?.to_rgb8();
        let image = egui::ColorImage::from_rgb(
            [rgb.width() as usize, rgb.height() as usize],
            rgb.as_raw(),
        );
        match &mut self.frame_texture {
            Some(texture) => texture.set(image, egui::TextureOptions::LINEAR),
            None => {
                self.frame_texture = Some(self.egui_ctx.load_texture(
                    "console-frame",
                    image,
                    egui::TextureOptions::LINEAR,
                ))
            }
        }
        Ok(())
    }

    /// Draw `frame` and present it.
    ///
    /// A lost or outdated surface is reconfigured and the frame skipped.
    pub fn present(&mut self, window: &Window, frame: &Mat) -> Result<(), DisplayError> {
        self.upload_frame(frame)?;

        let raw_input = self.egui_state.take_egui_input(window);
        self.egui_ctx.begin_pass(raw_input);
        self.draw_frame_panel();
        let full_output = self.egui_ctx.end_pass();
        self.egui_state
            .handle_platform_output(window, full_output.platform_output);

        let pixels_per_point = self.egui_ctx.pixels_per_point();
        let clipped_primitives = self
            .egui_ctx
            .tessellate(full_output.shapes, pixels_per_point);

        let output = match self.surface.get_current_texture() {
            Ok(output) => output,
            Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                let size = window.inner_size();
                self.resize(size.width, size.height);
                return Ok(());
            }
            Err(wgpu::SurfaceError::Timeout) => {
                log::warn!("Surface timeout, skipping frame");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };
        let view = output
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Console Encoder"),
            });

        let screen_descriptor = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [self.config.width, self.config.height],
            pixels_per_point,
        };

        for (id, delta) in &full_output.textures_delta.set {
            self.egui_renderer
                .update_texture(&self.device, &self.queue, *id, delta);
        }
        let extra_buffers = self.egui_renderer.update_buffers(
            &self.device,
            &self.queue,
            &mut encoder,
            &clipped_primitives,
            &screen_descriptor,
        );

        {
            let mut render_pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("Console Pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view: &view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
                .forget_lifetime();
            self.egui_renderer
                .render(&mut render_pass, &clipped_primitives, &screen_descriptor);
        }

        for id in &full_output.textures_delta.free {
            self.egui_renderer.free_texture(id);
        }

        self.queue.submit(
            extra_buffers
                .into_iter()
                .chain(std::iter::once(encoder.finish())),
        );
        output.present();
        Ok(())
    }

    fn draw_frame_panel(&self) {
        let Some(texture) = &self.frame_texture else {
            return;
        };
        egui::CentralPanel::default()
            .frame(egui::Frame::NONE.fill(egui::Color32::BLACK))
            .show(&self.egui_ctx, |ui| {
                let available = ui.available_size();
                let size = fit_size(texture.size_vec2(), available);
                ui.centered_and_justified(|ui| {
                    ui.image((texture.id(), size));
                });
            });
    }
}

/// Largest size with `content`'s aspect ratio that fits in `available`.
fn fit_size(content: egui::Vec2, available: egui::Vec2) -> egui::Vec2 {
    if content.x <= 0.0 || content.y <= 0.0 {
        return egui::Vec2::ZERO;
    }
    let scale = (available.x / content.x).min(available.y / content.y).max(0.0);
    content * scale
}
