// 摄像头驱动接口 - 硬件访问的最小抽象
//
// 所有方法都是阻塞调用，由 CameraArbiter 放到 spawn_blocking 中执行

use anyhow::{anyhow, Result};
use image::RgbImage;
use std::io::Cursor;

/// 已打开的摄像头句柄
pub trait CameraHandle: Send {
    /// 读取一帧
    fn read(&mut self) -> Result<RgbImage>;

    /// 句柄是否仍然可用
    fn is_opened(&self) -> bool;

    /// 释放硬件
    fn release(&mut self);
}

/// 摄像头驱动
pub trait CameraDriver: Send + Sync {
    /// 打开摄像头
    fn open(&self, index: usize, resolution: (u32, u32)) -> Result<Box<dyn CameraHandle>>;

    fn name(&self) -> &'static str;
}

/// 没有摄像头后端的平台上使用的驱动，打开总是失败
pub struct UnavailableDriver;

impl CameraDriver for UnavailableDriver {
    fn open(&self, index: usize, _resolution: (u32, u32)) -> Result<Box<dyn CameraHandle>> {
        Err(anyhow!(
            "摄像头 #{} 不可用：当前平台没有摄像头后端",
            index
        ))
    }

    fn name(&self) -> &'static str {
        "unavailable"
    }
}

/// 创建当前平台的默认驱动
pub fn default_driver(device: Option<String>) -> Box<dyn CameraDriver> {
    #[cfg(target_os = "linux")]
    {
        Box::new(super::v4l::V4lDriver::new(device))
    }

    #[cfg(not(target_os = "linux"))]
    {
        tracing::error!(
            "当前平台没有摄像头后端，监控将无法截图（设备配置: {:?}）",
            device
        );
        Box::new(UnavailableDriver)
    }
}

/// 把帧编码为 JPEG
pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Cursor::new(Vec::new());
    let mut encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buffer, quality);
    encoder.encode(
        frame.as_raw(),
        frame.width(),
        frame.height(),
        image::ColorType::Rgb8,
    )?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_driver_reports_error() {
        let err = UnavailableDriver.open(0, (640, 480)).err().unwrap();
        assert!(err.to_string().contains("#0"));
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_default_driver_is_v4l_on_linux() {
        assert_eq!(default_driver(None).name(), "v4l2");
    }

    #[test]
    fn test_encode_jpeg() {
        let frame = RgbImage::from_pixel(16, 8, image::Rgb([200, 10, 10]));
        let bytes = encode_jpeg(&frame, 85).unwrap();
        // JPEG SOI 标记
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (16, 8));
    }
}
