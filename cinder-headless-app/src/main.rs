//! Cinder 的 demo 程序
//!
//! ```text
//! cinder-demo [--vulkan] [--shaders <dir>] [--frames <n>] [config.toml]
//! ```
//!
//! 默认在 headless 设备上运行；`--vulkan` 使用真实的 GPU。vulkan 下只有提供了
//! `--shaders`（包含 `triangle.vs.spv` 和 `triangle.ps.spv`）时才会绘制三角形。

mod scene;

use std::path::PathBuf;

use anyhow::{Context, bail};
use cinder_crate_tools::init_log::init_log;
use cinder_rhi::headless::HeadlessDevice;
use cinder_rhi::{Rhi, RhiConfig};
use cinder_vulkan::{VulkanCreateInfo, VulkanDevice};

use crate::scene::{DemoRunner, ShaderBytes};

#[derive(Debug, Default)]
struct Args {
    vulkan: bool,
    shader_dir: Option<PathBuf>,
    frames_per_level: Option<u32>,
    config: Option<PathBuf>,
}

impl Args {
    fn parse() -> anyhow::Result<Self> {
        let mut args = Self::default();
        let mut iter = std::env::args().skip(1);
        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--vulkan" => args.vulkan = true,
                "--shaders" => args.shader_dir = Some(iter.next().context("--shaders needs a directory")?.into()),
                "--frames" => {
                    let value = iter.next().context("--frames needs a number")?;
                    args.frames_per_level = Some(value.parse().with_context(|| format!("bad frame count '{value}'"))?);
                }
                flag if flag.starts_with("--") => bail!("unknown flag '{flag}'"),
                path => args.config = Some(path.into()),
            }
        }
        Ok(args)
    }

    fn shaders(&self) -> anyhow::Result<Option<ShaderBytes>> {
        let Some(dir) = &self.shader_dir else {
            return Ok(None);
        };
        let read = |name: &str| std::fs::read(dir.join(name)).with_context(|| format!("failed to read {name}"));
        Ok(Some(ShaderBytes {
            vertex: read("triangle.vs.spv")?,
            pixel: read("triangle.ps.spv")?,
        }))
    }
}

fn main() -> anyhow::Result<()> {
    init_log();
    tracy_client::Client::start();
    tracy_client::set_thread_name!("MainThread");

    let args = Args::parse()?;
    let config = match &args.config {
        Some(path) => RhiConfig::load(path).with_context(|| format!("failed to load {}", path.display()))?,
        None => RhiConfig::default(),
    };
    log::info!("config: {config:?}");

    let mut runner = DemoRunner::default();
    if let Some(frames) = args.frames_per_level {
        runner.frames_per_level = frames;
    }

    if args.vulkan {
        let device = VulkanDevice::new(&VulkanCreateInfo {
            app_name: "cinder-demo".to_string(),
            ..Default::default()
        })?;
        let mut rhi = Rhi::new(device, config)?;
        let result = runner.run(&mut rhi, args.shaders()?);
        let device = rhi.shutdown()?;
        device.destroy();
        result?;
    } else {
        // headless 设备不解析字节码，没有提供 shader 时用占位数据
        let shaders = args.shaders()?.unwrap_or_else(ShaderBytes::placeholder);
        let mut rhi = Rhi::new(HeadlessDevice::default(), config)?;
        let result = runner.run(&mut rhi, Some(shaders));
        let stats = rhi.device().stats().clone();
        rhi.shutdown()?;
        result?;
        log::info!(
            "headless stats: {} draws, {} copies, {} barrier batches, at most {} frames in flight",
            stats.draws,
            stats.copies,
            stats.barrier_batches,
            stats.max_frames_in_flight
        );
    }

    log::info!("end run.");
    Ok(())
}
