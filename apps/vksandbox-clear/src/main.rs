//! vksandbox clear-screen sample
//!
//! Clears the window to a cycling color through the vksandbox frame driver.
//! Useful as a smoke test for the swapchain, queue ownership transfers,
//! multisample resolve and the memory arenas.
//!
//! ## Usage
//!
//! ```bash
//! cargo run -p vksandbox-clear -- [OPTIONS]
//! ```
//!
//! ## Options
//!
//! ### Sample options
//! - `--msaa`: Render into a 4x multisample target and resolve
//! - `--depth`: Allocate and clear a depth buffer
//! - `--async-compute`: Request a separate compute queue
//! - `-v, --verbose`: Log timing for every frame
//!
//! ### Framework options
//! - `--width <N>`, `--height <N>`: Window size (default: 800x600)
//! - `--frames <N>`: Exit after N frames
//! - `--fixed-timestep`: Advance time by 0.1 s per frame
//! - `--separate-present`: Present from a separate queue family if available
//! - `--no-validation`: Disable validation layers
//! - `--no-vsync`: Disable vsync
//!
//! ### Other
//! - `-h, --help`: Print help message
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;

use vksandbox_sample::{run_sample, SampleConfig, SampleOptions};

use crate::app::ClearSample;

fn main() -> anyhow::Result<()> {
    // Check for help flag before starting the sample
    if std::env::args().any(|arg| arg == "-h" || arg == "--help") {
        print_help();
        return Ok(());
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = SampleConfig::new("vksandbox - clear")
        .with_options(parse_options(&args))
        .apply_args(&args)?;

    run_sample::<ClearSample>(config)
}

fn parse_options(args: &[String]) -> SampleOptions {
    let mut options = SampleOptions::new();
    for arg in args {
        match arg.as_str() {
            "--msaa" => options = options.enable_multisampling(),
            "--depth" => options = options.enable_depth_buffer(),
            "--async-compute" => options = options.enable_async_compute(),
            "-v" | "--verbose" => options = options.enable_verbose(),
            _ => {}
        }
    }
    options
}

fn print_help() {
    eprintln!(
        "vksandbox clear-screen sample

USAGE:
    cargo run -p vksandbox-clear -- [OPTIONS]

SAMPLE OPTIONS:
    --msaa                  Render into a 4x multisample target and resolve
    --depth                 Allocate and clear a depth buffer
    --async-compute         Request a separate compute queue
    -v, --verbose           Log timing for every frame

FRAMEWORK OPTIONS:
    --width <N>             Window width (default: 800)
    --height <N>            Window height (default: 600)
    --frames <N>            Exit after N frames
    --fixed-timestep        Advance time by 0.1 s per frame
    --separate-present      Present from a separate queue family if available
    --no-validation         Disable validation layers
    --no-vsync              Disable vsync

OTHER:
    -h, --help              Print this help message

EXAMPLES:
    # Multisampled with depth, 300 frames
    cargo run -p vksandbox-clear -- --msaa --depth --frames 300

    # Exercise queue ownership transfers
    cargo run -p vksandbox-clear -- --separate-present -v

ENVIRONMENT VARIABLES:
    RUST_LOG                Set log level (e.g., info, debug, trace)"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn sample_flags_map_to_options() {
        let options = parse_options(&args(&["--msaa", "--width", "640", "-v"]));
        assert!(options.multisampling);
        assert!(options.verbose);
        assert!(!options.depth_buffer);
        assert!(!options.async_compute);
    }

    #[test]
    fn framework_and_sample_flags_combine() {
        let argv = args(&["--depth", "--frames", "5", "--separate-present"]);
        let config = SampleConfig::new("t")
            .with_options(parse_options(&argv))
            .apply_args(&argv)
            .unwrap();
        assert!(config.options.depth_buffer);
        assert_eq!(config.frame_limit, Some(5));
        assert!(config.prefer_separate_present);
    }
}
