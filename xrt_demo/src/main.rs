//! Minimal session driver: opens a window, runs one compositor session
//! through a mock target, and logs the frame pacing and merge decisions a
//! real device layer would hand off to Vulkan.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use parking_lot::Mutex;
use winit::{
    event::{Event, WindowEvent},
    event_loop::{ControlFlow, EventLoop},
    window::WindowBuilder,
};

use xrt_compositor::{Compositor, CompositorEvent, MultiCompositor, OwnedSyncHandle};
use xrt_render::{Layer, LayerFlags, LayerType};
use xrt_swapchain::{MockTarget, Target};
use xrt_util::pose::Pose;

struct NoopSyncHandle;

impl OwnedSyncHandle for NoopSyncHandle {
    fn close(self: Box<Self>) {}
}

fn main() -> Result<()> {
    let env = env_logger::Env::default()
        .filter_or("XRT_LOG_LEVEL", "info")
        .write_style_or("XRT_LOG_STYLE", "always");
    env_logger::init_from_env(env);

    let event_loop = EventLoop::new()?;
    let window = WindowBuilder::new()
        .with_title("xrt_compositor demo")
        .with_inner_size(winit::dpi::PhysicalSize::new(1280, 720))
        .build(&event_loop)?;

    let mut target = MockTarget::new(3);
    target.init_pre_vulkan()?;
    target.init_post_vulkan(1280, 720)?;
    target.create_images(
        1280,
        720,
        ash::vk::Format::R8G8B8A8_SRGB,
        ash::vk::ColorSpaceKHR::SRGB_NONLINEAR,
        ash::vk::ImageUsageFlags::COLOR_ATTACHMENT,
        ash::vk::PresentModeKHR::FIFO,
    )?;

    let mut multi = MultiCompositor::new(11_111_111);
    let client = Arc::new(Mutex::new(Compositor::with_fake_pacer(11_111_111)));
    client.lock().begin_session()?;
    client.lock().mark_prepared();
    client.lock().mark_visible();
    client.lock().mark_focused();
    let client_order = multi.add_client(client.clone());

    let start = Instant::now();

    event_loop.run(move |event, eltw| {
        eltw.set_control_flow(ControlFlow::Poll);

        match event {
            Event::WindowEvent { event: WindowEvent::CloseRequested, .. } => eltw.exit(),
            Event::AboutToWait => window.request_redraw(),
            Event::WindowEvent { event: WindowEvent::RedrawRequested, .. } => {
                let now_ns = start.elapsed().as_nanos() as i64;

                while let Some(CompositorEvent::StateChanged(state)) = client.lock().poll_events() {
                    log::info!("client session state changed: {state:?}");
                }

                let prediction = match client.lock().predict_frame(now_ns) {
                    Ok(prediction) => prediction,
                    Err(e) => {
                        log::warn!("predict_frame failed: {e}");
                        return;
                    }
                };
                client.lock().mark_woke(prediction.frame_id, now_ns);
                client.lock().begin_frame(prediction.frame_id, now_ns);

                client.lock().layer_begin();
                client
                    .lock()
                    .layer_add(Layer {
                        layer_type: LayerType::StereoProjection,
                        pose: Pose::identity(),
                        subimages: vec![],
                        flags: LayerFlags::default(),
                        swapchain_indices: vec![0, 1],
                    })
                    .expect("single layer always fits");

                let slot = client
                    .lock()
                    .layer_commit(prediction.frame_id, Box::new(NoopSyncHandle))
                    .expect("frame id matches what we just predicted");
                multi.submit_client_slot(client_order, slot);

                let merged = multi.merge_for_native_commit();
                log::debug!("merged {} layer(s) for native commit", merged.layers.len());

                match target.acquire(ash::vk::Semaphore::null()) {
                    Ok((index, _outcome)) => {
                        let present_ns = now_ns + 1_000_000;
                        client.lock().finish_render(prediction.frame_id, now_ns, now_ns, present_ns);
                        let _ = target.present(
                            ash::vk::Queue::null(),
                            index,
                            ash::vk::Semaphore::null(),
                            prediction.desired_present_ns,
                            prediction.slop_ns,
                        );
                    }
                    Err(e) => log::warn!("target acquire failed: {e}"),
                }
            }
            _ => (),
        }
    })?;

    Ok(())
}
