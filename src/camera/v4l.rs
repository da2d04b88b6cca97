// V4L2 摄像头后端（Linux）
//
// 以 MJPG 格式采集，解码为 RGB；缓冲区只保留 1 帧以减少延迟

use anyhow::{anyhow, Context, Result};
use image::RgbImage;
use tracing::{info, warn};
use v4l::buffer::Type;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use super::driver::{CameraDriver, CameraHandle};

pub struct V4lDriver {
    /// 显式设备路径，未设置时使用 /dev/video{index}
    device: Option<String>,
}

impl V4lDriver {
    pub fn new(device: Option<String>) -> Self {
        Self { device }
    }

    fn device_path(&self, index: usize) -> String {
        self.device
            .clone()
            .unwrap_or_else(|| format!("/dev/video{}", index))
    }
}

impl CameraDriver for V4lDriver {
    fn open(&self, index: usize, resolution: (u32, u32)) -> Result<Box<dyn CameraHandle>> {
        let path = self.device_path(index);
        let device =
            Device::with_path(&path).with_context(|| format!("打开摄像头设备失败: {}", path))?;

        let mut format = device.format()?;
        format.width = resolution.0;
        format.height = resolution.1;
        format.fourcc = v4l::FourCC::new(b"MJPG");
        let actual = device.set_format(&format)?;

        if actual.fourcc != v4l::FourCC::new(b"MJPG") {
            return Err(anyhow!("摄像头不支持 MJPG 格式: {}", actual.fourcc));
        }
        if (actual.width, actual.height) != resolution {
            warn!(
                "摄像头分辨率 {}x{} 与配置 {}x{} 不一致",
                actual.width, actual.height, resolution.0, resolution.1
            );
        }

        let stream = MmapStream::with_buffers(&device, Type::VideoCapture, 1)
            .with_context(|| format!("创建采集流失败: {}", path))?;

        info!("V4L2 摄像头已打开: {} ({}x{})", path, actual.width, actual.height);
        Ok(Box::new(V4lHandle {
            stream: Some(stream),
            device: Some(device),
        }))
    }

    fn name(&self) -> &'static str {
        "v4l2"
    }
}

struct V4lHandle {
    stream: Option<MmapStream<'static>>,
    device: Option<Device>,
}

impl CameraHandle for V4lHandle {
    fn read(&mut self) -> Result<RgbImage> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| anyhow!("采集流已关闭"))?;

        let (buf, meta) = stream.next()?;
        let used = (meta.bytesused as usize).min(buf.len());
        let frame = image::load_from_memory_with_format(&buf[..used], image::ImageFormat::Jpeg)?;
        Ok(frame.to_rgb8())
    }

    fn is_opened(&self) -> bool {
        self.stream.is_some()
    }

    fn release(&mut self) {
        // 先停流再关设备
        self.stream.take();
        self.device.take();
    }
}
