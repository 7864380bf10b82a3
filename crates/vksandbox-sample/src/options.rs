//! Sample configuration.

use anyhow::{anyhow, Context};
use ash::vk;
use std::ffi::CStr;
use vksandbox_gpu::{ArenaSizes, DeviceRequirements};

/// Framework features a sample opts into.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SampleOptions {
    pub multisampling: bool,
    pub depth_buffer: bool,
    pub verbose: bool,
    pub async_compute: bool,
    pub sparse_binding: bool,
}

impl SampleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Render into a 4x multisampled target resolved at the end of the frame.
    pub fn enable_multisampling(mut self) -> Self {
        self.multisampling = true;
        self
    }

    /// Give every frame a `D16_UNORM` depth attachment.
    pub fn enable_depth_buffer(mut self) -> Self {
        self.depth_buffer = true;
        self
    }

    /// Log timing for every frame.
    pub fn enable_verbose(mut self) -> Self {
        self.verbose = true;
        self
    }

    /// Request a compute queue separate from the render queue.
    pub fn enable_async_compute(mut self) -> Self {
        self.async_compute = true;
        self
    }

    /// Require a sparse-binding queue, exposed as
    /// [`vksandbox_gpu::GpuContext::sparse_binding_queue`].
    pub fn enable_sparse_binding(mut self) -> Self {
        self.sparse_binding = true;
        self
    }
}

/// Everything the runner needs to start a sample.
#[derive(Debug, Clone)]
pub struct SampleConfig {
    /// Window title and Vulkan application name.
    pub title: String,
    pub width: u32,
    pub height: u32,
    /// Pass a constant 0.1 s to `update` instead of wall-clock time.
    pub fixed_timestep: bool,
    /// Present from a different queue family when the device has one.
    pub prefer_separate_present: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    pub vsync: bool,
    /// Exit after this many frames.
    pub frame_limit: Option<u64>,
    pub options: SampleOptions,
    pub arena_sizes: ArenaSizes,
    /// Device features and extensions beyond the harness defaults.
    pub requirements: DeviceRequirements,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            title: "vksandbox".to_string(),
            width: 800,
            height: 600,
            fixed_timestep: false,
            prefer_separate_present: false,
            validation: cfg!(debug_assertions),
            vsync: true,
            frame_limit: None,
            options: SampleOptions::default(),
            arena_sizes: ArenaSizes::default(),
            requirements: DeviceRequirements::default(),
        }
    }
}

impl SampleConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Set the window dimensions.
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_fixed_timestep(mut self, fixed: bool) -> Self {
        self.fixed_timestep = fixed;
        self
    }

    pub fn with_separate_present(mut self, prefer: bool) -> Self {
        self.prefer_separate_present = prefer;
        self
    }

    /// Enable or disable validation layers.
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Enable or disable vsync.
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    pub fn with_frame_limit(mut self, frames: u64) -> Self {
        self.frame_limit = Some(frames);
        self
    }

    pub fn with_options(mut self, options: SampleOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_arena_sizes(mut self, sizes: ArenaSizes) -> Self {
        self.arena_sizes = sizes;
        self
    }

    /// Core features the device must support; they are enabled on it.
    pub fn with_features(mut self, features: vk::PhysicalDeviceFeatures) -> Self {
        self.requirements = self.requirements.with_features(features);
        self
    }

    /// Device extensions the device must support; they are enabled on it.
    pub fn with_extensions(mut self, extensions: &[&'static CStr]) -> Self {
        self.requirements = self.requirements.with_extensions(extensions);
        self
    }

    /// What device creation must satisfy, with the sparse-binding option
    /// folded in.
    pub fn device_requirements(&self) -> DeviceRequirements {
        self.requirements
            .clone()
            .with_sparse_binding(self.requirements.sparse_binding || self.options.sparse_binding)
    }

    /// Override settings from command-line arguments.
    ///
    /// Recognised: `--fixed-timestep`, `--separate-present`, `--no-validation`,
    /// `--no-vsync`, `--width N`, `--height N`, `--frames N`. Anything else is
    /// left for the sample itself.
    pub fn apply_args<I, S>(mut self, args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut args = args.into_iter();
        while let Some(arg) = args.next() {
            match arg.as_ref() {
                "--fixed-timestep" => self.fixed_timestep = true,
                "--separate-present" => self.prefer_separate_present = true,
                "--no-validation" => self.validation = false,
                "--no-vsync" => self.vsync = false,
                "--width" => self.width = parse_value(&mut args, "--width")?,
                "--height" => self.height = parse_value(&mut args, "--height")?,
                "--frames" => self.frame_limit = Some(parse_value(&mut args, "--frames")?),
                _ => {}
            }
        }
        Ok(self)
    }

    /// [`Self::apply_args`] over the process arguments.
    pub fn with_env_args(self) -> anyhow::Result<Self> {
        self.apply_args(std::env::args().skip(1))
    }
}

fn parse_value<T, I, S>(args: &mut I, flag: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    I: Iterator<Item = S>,
    S: AsRef<str>,
{
    let value = args.next().ok_or_else(|| anyhow!("{flag} expects a value"))?;
    value
        .as_ref()
        .parse()
        .with_context(|| format!("invalid value {:?} for {flag}", value.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_builder_sets_flags() {
        let options = SampleOptions::new()
            .enable_multisampling()
            .enable_depth_buffer();
        assert!(options.multisampling);
        assert!(options.depth_buffer);
        assert!(!options.verbose);
        assert!(!options.async_compute);
        assert!(!options.sparse_binding);
    }

    #[test]
    fn device_requirements_collect_features_extensions_and_sparse_binding() {
        let config = SampleConfig::new("requirements")
            .with_features(vk::PhysicalDeviceFeatures {
                fill_mode_non_solid: vk::TRUE,
                ..Default::default()
            })
            .with_extensions(&[c"VK_EXT_memory_budget"])
            .with_options(SampleOptions::new().enable_sparse_binding());

        let requirements = config.device_requirements();
        assert!(requirements.sparse_binding);
        assert_eq!(requirements.extensions, vec![c"VK_EXT_memory_budget"]);

        let features = requirements.enabled_features();
        assert_eq!(features.fill_mode_non_solid, vk::TRUE);
        assert_eq!(features.sparse_binding, vk::TRUE);
        assert_eq!(features.geometry_shader, vk::FALSE);
    }

    #[test]
    fn default_config_requires_nothing_extra() {
        let requirements = SampleConfig::default().device_requirements();
        assert!(!requirements.sparse_binding);
        assert!(requirements.extensions.is_empty());
        assert!(requirements
            .unmet(&vk::PhysicalDeviceFeatures::default(), &[], false)
            .is_empty());
    }

    #[test]
    fn args_override_defaults() {
        let config = SampleConfig::new("test")
            .apply_args([
                "--fixed-timestep",
                "--width",
                "320",
                "--height",
                "240",
                "--frames",
                "10",
                "--separate-present",
                "--no-validation",
            ])
            .unwrap();

        assert!(config.fixed_timestep);
        assert!(config.prefer_separate_present);
        assert!(!config.validation);
        assert_eq!((config.width, config.height), (320, 240));
        assert_eq!(config.frame_limit, Some(10));
    }

    #[test]
    fn unknown_args_are_left_alone() {
        let config = SampleConfig::new("test")
            .with_size(100, 100)
            .apply_args(["--sample-specific", "7"])
            .unwrap();
        assert_eq!((config.width, config.height), (100, 100));
        assert_eq!(config.frame_limit, None);
    }

    #[test]
    fn missing_or_bad_values_are_errors() {
        let err = SampleConfig::default().apply_args(["--width"]).unwrap_err();
        assert!(err.to_string().contains("--width"));

        let err = SampleConfig::default()
            .apply_args(["--frames", "many"])
            .unwrap_err();
        assert!(err.to_string().contains("many"));
    }

    #[test]
    fn builder_chains() {
        let config = SampleConfig::new("chain")
            .with_fixed_timestep(true)
            .with_frame_limit(3)
            .with_options(SampleOptions::new().enable_verbose())
            .with_arena_sizes(ArenaSizes {
                host_mb: 2,
                ..ArenaSizes::default()
            });
        assert_eq!(config.title, "chain");
        assert!(config.options.verbose);
        assert_eq!(config.arena_sizes.host_mb, 2);
        assert_eq!(config.arena_sizes.device_image_mb, 64);
    }
}
