//! Preview window: hosts a [`Stage`] in winit, drawing with egui over wgpu.
//!
//! There is no video decoder here. The current segment is drawn as a flat
//! colour field driven by [`ClockVideo`], with the distortion, CRT and
//! dialogue overlays on top.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use egui::{Color32, FontId, LayerId, Pos2, Rect as EguiRect, Stroke, Vec2};
use egui_wgpu::{Renderer as EguiRenderer, ScreenDescriptor};
use log::{debug, error, info};
use url::Url;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, Event as WinitEvent, KeyEvent, MouseButton, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::keyboard::{Key, NamedKey};
use winit::window::WindowBuilder;

use crate::chat::{ChatLink, HttpChatClient};
use crate::config::RoomConfig;
use crate::dialogue::KeyInput;
use crate::distortion::DistortionFrame;
use crate::stage::{FrameView, Stage, StageSettings};
use crate::textbox::{MonospaceMetrics, TextBox, BOX_ALPHA, FONT_SIZE};
use crate::timecodes::{BRIGHT, BRIGHT_TO_BLINDING, COLLAPSE, DIM, DIM_TO_BRIGHT, INTRO, MENU};
use crate::video::ClockVideo;

const FRAME_INTERVAL: Duration = Duration::from_millis(16);
const WINDOW_SIZE: (f64, f64) = (1280.0, 720.0);
const SCANLINE_SPACING: f32 = 3.0;

struct Gpu {
    surface: wgpu::Surface<'static>,
    device: wgpu::Device,
    queue: wgpu::Queue,
    config: wgpu::SurfaceConfiguration,
}

pub fn run(config: RoomConfig, endpoint: Url) -> Result<()> {
    let table = config.timecode_table()?;
    let client = HttpChatClient::new(&endpoint, config.request_timeout())?;
    let link = ChatLink::new(client)?;

    let event_loop = EventLoop::new().context("failed to create play event loop")?;
    let window = Arc::new(
        WindowBuilder::new()
            .with_title("Steve's Room")
            .with_inner_size(LogicalSize::new(WINDOW_SIZE.0, WINDOW_SIZE.1))
            .build(&event_loop)
            .context("failed to create preview window")?,
    );
    let mut gpu = pollster::block_on(init_gpu(window.clone()))?;

    let epoch = Instant::now();
    let mut video = ClockVideo::new(config.video_duration_secs);
    video.mark_loaded(0);
    let mut stage = Stage::new(table, video, StageSettings::from(&config));
    let logical = window.inner_size().to_logical::<f32>(window.scale_factor());
    stage.resize(logical.width, logical.height);
    stage.assets_ready(0);

    let metrics = MonospaceMetrics::default();
    let egui_ctx = egui::Context::default();
    let mut egui_state =
        egui_winit::State::new(egui_ctx.clone(), egui::ViewportId::ROOT, &event_loop, None, None);
    let mut egui_renderer = EguiRenderer::new(&gpu.device, gpu.config.format, None, 1);

    info!(
        "play: chat endpoint {}, press Enter or click to start, F2 to mute, Esc to quit",
        link_url(&endpoint)
    );

    let mut next_redraw_at = Instant::now();
    event_loop
        .run(move |event, target| {
            let now_ms = epoch.elapsed().as_millis() as u64;

            match event {
                WinitEvent::WindowEvent { window_id, event } if window_id == window.id() => {
                    let egui_response = egui_state.on_window_event(&window, &event);
                    match event {
                        WindowEvent::CloseRequested => target.exit(),
                        WindowEvent::KeyboardInput { event, .. }
                            if event.state == ElementState::Pressed =>
                        {
                            match &event.logical_key {
                                Key::Named(NamedKey::Escape) => target.exit(),
                                Key::Named(NamedKey::F2) => {
                                    let muted = stage.toggle_mute();
                                    info!("play: {}", if muted { "muted" } else { "unmuted" });
                                }
                                Key::Named(NamedKey::Enter) if !stage.is_started() => {
                                    stage.start(now_ms);
                                }
                                _ if !egui_response.consumed => {
                                    if let Some(request) = stage.key(map_key(&event), now_ms) {
                                        link.send(request);
                                    }
                                }
                                _ => {}
                            }
                        }
                        WindowEvent::MouseInput {
                            state: ElementState::Pressed,
                            button: MouseButton::Left,
                            ..
                        } if !stage.is_started() => stage.start(now_ms),
                        WindowEvent::Resized(size) => {
                            if size.width > 0 && size.height > 0 {
                                gpu.config.width = size.width;
                                gpu.config.height = size.height;
                                gpu.surface.configure(&gpu.device, &gpu.config);
                                let logical = size.to_logical::<f32>(window.scale_factor());
                                stage.resize(logical.width, logical.height);
                            }
                        }
                        WindowEvent::RedrawRequested => {
                            stage.video_mut().sync(now_ms);
                            let view = stage.frame(now_ms, &metrics);
                            render_frame(
                                &window,
                                &mut gpu,
                                &egui_ctx,
                                &mut egui_state,
                                &mut egui_renderer,
                                &view,
                            );
                        }
                        _ => {}
                    }
                }
                WinitEvent::AboutToWait => {
                    while let Some(outcome) = link.try_recv() {
                        stage.deliver(outcome);
                    }
                    stage.video_mut().sync(now_ms);
                    stage.run_due_ticks(now_ms);
                    for event in stage.drain_events() {
                        debug!("play: {event:?}");
                    }

                    let now = Instant::now();
                    if now >= next_redraw_at {
                        window.request_redraw();
                        next_redraw_at = now + FRAME_INTERVAL;
                    }
                    target.set_control_flow(ControlFlow::WaitUntil(next_redraw_at));
                }
                _ => {}
            }
        })
        .map_err(|error| anyhow!("play event loop terminated: {error}"))
}

fn link_url(endpoint: &Url) -> String {
    crate::chat::chat_url(endpoint)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| endpoint.to_string())
}

async fn init_gpu(window: Arc<winit::window::Window>) -> Result<Gpu> {
    let size = window.inner_size();
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor::default());
    let surface = instance
        .create_surface(window)
        .context("failed to create wgpu surface")?;
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::LowPower,
            force_fallback_adapter: false,
            compatible_surface: Some(&surface),
        })
        .await
        .ok_or_else(|| anyhow!("no suitable GPU adapter found"))?;
    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("stevesroom-device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
            },
            None,
        )
        .await
        .context("failed to request wgpu device")?;

    let caps = surface.get_capabilities(&adapter);
    let format = pick_surface_format(&caps.formats)?;
    let alpha_mode = caps
        .alpha_modes
        .first()
        .copied()
        .unwrap_or(wgpu::CompositeAlphaMode::Auto);
    let config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode: wgpu::PresentMode::Fifo,
        alpha_mode,
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };
    surface.configure(&device, &config);

    Ok(Gpu {
        surface,
        device,
        queue,
        config,
    })
}

fn pick_surface_format(formats: &[wgpu::TextureFormat]) -> Result<wgpu::TextureFormat> {
    formats
        .iter()
        .copied()
        .find(|format| format.is_srgb())
        .or_else(|| formats.first().copied())
        .ok_or_else(|| anyhow!("surface reports no texture formats"))
}

fn map_key(event: &KeyEvent) -> KeyInput {
    match &event.logical_key {
        Key::Named(NamedKey::Enter) => KeyInput::Enter,
        Key::Named(NamedKey::Backspace) => KeyInput::Backspace,
        Key::Named(NamedKey::Space) => KeyInput::Char(' '),
        Key::Character(text) => {
            let mut chars = text.chars();
            match (chars.next(), chars.next()) {
                (Some(ch), None) => KeyInput::Char(ch),
                _ => KeyInput::Other,
            }
        }
        _ => KeyInput::Other,
    }
}

fn render_frame(
    window: &winit::window::Window,
    gpu: &mut Gpu,
    egui_ctx: &egui::Context,
    egui_state: &mut egui_winit::State,
    egui_renderer: &mut EguiRenderer,
    view: &FrameView,
) {
    if gpu.config.width == 0 || gpu.config.height == 0 {
        return;
    }

    let frame = match gpu.surface.get_current_texture() {
        Ok(frame) => frame,
        Err(wgpu::SurfaceError::Outdated | wgpu::SurfaceError::Lost) => {
            gpu.surface.configure(&gpu.device, &gpu.config);
            return;
        }
        Err(wgpu::SurfaceError::Timeout) => return,
        Err(wgpu::SurfaceError::OutOfMemory) => {
            error!("play: surface out of memory");
            return;
        }
    };
    let target = frame
        .texture
        .create_view(&wgpu::TextureViewDescriptor::default());

    let raw_input = egui_state.take_egui_input(window);
    let full_output = egui_ctx.run(raw_input, |ctx| draw_stage(ctx, view));
    egui_state.handle_platform_output(window, full_output.platform_output);
    let pixels_per_point = window.scale_factor() as f32;
    let paint_jobs = egui_ctx.tessellate(full_output.shapes, pixels_per_point);

    for (texture_id, delta) in &full_output.textures_delta.set {
        egui_renderer.update_texture(&gpu.device, &gpu.queue, *texture_id, delta);
    }

    let mut encoder = gpu
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("stevesroom-frame"),
        });
    let screen_descriptor = ScreenDescriptor {
        size_in_pixels: [gpu.config.width, gpu.config.height],
        pixels_per_point,
    };
    egui_renderer.update_buffers(
        &gpu.device,
        &gpu.queue,
        &mut encoder,
        &paint_jobs,
        &screen_descriptor,
    );

    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("stevesroom-stage-pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        egui_renderer.render(&mut pass, &paint_jobs, &screen_descriptor);
    }

    for texture_id in &full_output.textures_delta.free {
        egui_renderer.free_texture(texture_id);
    }

    gpu.queue.submit(Some(encoder.finish()));
    frame.present();
}

fn draw_stage(ctx: &egui::Context, view: &FrameView) {
    let screen = ctx.screen_rect();
    let painter = ctx.layer_painter(LayerId::background());
    let distortion = view.distortion;

    let (x, y) = distortion.video_offset;
    painter.rect_filled(
        screen.translate(Vec2::new(x, y)),
        0.0,
        segment_color(view.segment.as_deref(), view.video_time),
    );
    painter.text(
        screen.left_top() + Vec2::new(12.0, 12.0),
        egui::Align2::LEFT_TOP,
        format!(
            "{} {:5.2}s{}",
            view.segment.as_deref().unwrap_or("loading"),
            view.video_time,
            if view.muted { "  [muted]" } else { "" }
        ),
        FontId::monospace(13.0),
        Color32::from_white_alpha(90),
    );

    draw_distortion(&painter, screen, &distortion);
    if view.crt {
        draw_scanlines(&painter, screen);
    }

    if !view.started {
        painter.text(
            screen.center(),
            egui::Align2::CENTER_CENTER,
            "press Enter to visit Steve",
            FontId::monospace(FONT_SIZE * 1.2),
            Color32::from_gray(220),
        );
        return;
    }

    for text_box in [&view.steve_box, &view.user_box].into_iter().flatten() {
        draw_text_box(ctx, &painter, text_box);
    }
    if let Some(status) = view.loading {
        painter.text(
            Pos2::new(screen.center().x, screen.top() + 40.0),
            egui::Align2::CENTER_TOP,
            status,
            FontId::monospace(FONT_SIZE * 0.8),
            Color32::from_gray(200),
        );
    }
}

fn segment_color(segment: Option<&str>, video_time: f64) -> Color32 {
    let flicker = ((video_time * 3.0).sin() * 6.0) as i16;
    let shade = |r: i16, g: i16, b: i16| {
        Color32::from_rgb(
            (r + flicker).clamp(0, 255) as u8,
            (g + flicker).clamp(0, 255) as u8,
            (b + flicker).clamp(0, 255) as u8,
        )
    };
    match segment {
        Some(MENU) => shade(20, 20, 24),
        Some(INTRO) => shade(36, 38, 48),
        Some(DIM) => shade(44, 48, 62),
        Some(DIM_TO_BRIGHT) => shade(110, 100, 80),
        Some(BRIGHT) => shade(190, 170, 120),
        Some(BRIGHT_TO_BLINDING) => shade(240, 236, 220),
        Some(COLLAPSE) => shade(12, 10, 14),
        _ => Color32::BLACK,
    }
}

fn draw_distortion(painter: &egui::Painter, screen: EguiRect, distortion: &DistortionFrame) {
    if distortion.darken_alpha > 0 {
        painter.rect_filled(screen, 0.0, Color32::from_black_alpha(distortion.darken_alpha));
    }
    if distortion.red_alpha > 0 {
        painter.rect_filled(
            screen,
            0.0,
            Color32::from_rgba_unmultiplied(255, 0, 0, distortion.red_alpha),
        );
    }
}

fn draw_scanlines(painter: &egui::Painter, screen: EguiRect) {
    let stroke = Stroke::new(1.0, Color32::from_black_alpha(70));
    let mut y = screen.top();
    while y < screen.bottom() {
        painter.hline(screen.x_range(), y, stroke);
        y += SCANLINE_SPACING;
    }
}

fn draw_text_box(ctx: &egui::Context, painter: &egui::Painter, text_box: &TextBox) {
    let rect = EguiRect::from_min_size(
        Pos2::new(text_box.rect.x, text_box.rect.y),
        Vec2::new(text_box.rect.w, text_box.rect.h),
    );
    painter.rect_filled(rect, 4.0, Color32::from_black_alpha(BOX_ALPHA));

    let galley = ctx.fonts(|fonts| {
        fonts.layout(
            text_box.text.clone(),
            FontId::monospace(FONT_SIZE),
            Color32::WHITE,
            text_box.wrap_width,
        )
    });
    if galley.rows.len() as u32 > text_box.lines {
        debug!(
            "play: text wrapped to {} lines, layout expected {}",
            galley.rows.len(),
            text_box.lines
        );
    }
    painter.galley(
        Pos2::new(text_box.text_origin.0, text_box.text_origin.1),
        galley,
        Color32::WHITE,
    );
}
