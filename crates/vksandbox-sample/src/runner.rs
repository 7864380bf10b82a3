//! Window, event loop and process lifetime for a sample.

use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use vksandbox_gpu::{GpuContextBuilder, Swapchain};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::app::SampleApp;
use crate::driver::Sample;
use crate::options::SampleConfig;

/// Run a sample until its window closes or the frame limit is reached.
///
/// Initializes logging, creates the window, GPU context and swapchain, and
/// drives [`Sample::process_frame`] on every redraw. Any error from
/// initialization or a frame is fatal: it is logged and the process exits
/// with status 1.
pub fn run_sample<A: SampleApp + 'static>(config: SampleConfig) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = SampleRunner::<A> {
        config,
        state: None,
    };
    event_loop.run_app(&mut runner)?;
    Ok(())
}

struct SampleRunner<A: SampleApp> {
    config: SampleConfig,
    state: Option<SampleState<A>>,
}

struct SampleState<A: SampleApp> {
    // Dropped before the window its surface was created from.
    sample: Sample<A>,
    window: Window,
}

impl<A: SampleApp + 'static> ApplicationHandler for SampleRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Sample ready");
            }
            Err(e) => fatal("Failed to initialize sample", &e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.shutdown(event_loop);
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                if let Err(e) = state.sample.process_frame() {
                    fatal("Frame failed", &e);
                }

                let limit_reached = self
                    .config
                    .frame_limit
                    .is_some_and(|limit| state.sample.frame_count() >= limit);
                if limit_reached {
                    info!(frames = state.sample.frame_count(), "Frame limit reached");
                    self.shutdown(event_loop);
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }
}

impl<A: SampleApp + 'static> SampleRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<SampleState<A>> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
            .with_resizable(false);
        let window = event_loop.create_window(window_attrs)?;

        let gpu = GpuContextBuilder::new()
            .app_name(&self.config.title)
            .validation(self.config.validation)
            .prefer_separate_present(self.config.prefer_separate_present)
            .async_compute(self.config.options.async_compute)
            .requirements(self.config.device_requirements())
            .arena_sizes(self.config.arena_sizes)
            .build_with_window(&window)?;

        info!("GPU: {}", gpu.capabilities().summary());

        let size = window.inner_size();
        let swapchain = unsafe { Swapchain::new(&gpu, size.width, size.height, self.config.vsync)? };

        let mut sample = Sample::<A>::new(gpu, swapchain, &self.config)?;
        sample.initialize()?;

        Ok(SampleState { sample, window })
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            if let Err(e) = state.sample.destroy() {
                error!("Failed to destroy sample: {e:#}");
            }
        }
        event_loop.exit();
    }
}

fn fatal(context: &str, error: &anyhow::Error) -> ! {
    error!("{context}: {error:#}");
    std::process::exit(1);
}
