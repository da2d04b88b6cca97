// 摄像头仲裁模块 - 唯一持有摄像头句柄，串行化模式切换与硬件读写
//
// 模式：None / Capture（单次截图）/ Preview（连续预览）
// 同一时刻只有一个模式生效，所有切换和读帧都在同一把锁内完成

pub mod driver;
#[cfg(target_os = "linux")]
pub mod v4l;

pub use driver::{default_driver, encode_jpeg, CameraDriver, CameraHandle, UnavailableDriver};

use anyhow::{anyhow, Result};
use image::RgbImage;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// 摄像头模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraMode {
    None,
    Capture,
    Preview,
}

impl fmt::Display for CameraMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::None => "none",
            Self::Capture => "capture",
            Self::Preview => "preview",
        };
        f.write_str(text)
    }
}

/// 摄像头配置
#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub index: usize,
    pub resolution: (u32, u32),
    pub jpeg_quality: u8,
    /// 截图保存目录
    pub output_dir: PathBuf,
    /// 释放后重新打开前的等待时间
    pub switch_delay: Duration,
    /// 预览客户端超时
    pub preview_timeout: Duration,
    /// 截图前丢弃的缓冲帧数
    pub discard_frames: usize,
    /// 会话内读帧重试次数
    pub read_retries: usize,
    /// 打开摄像头的尝试次数（线性退避）
    pub open_attempts: usize,
    pub open_backoff: Duration,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            index: 0,
            resolution: (1920, 1080),
            jpeg_quality: 85,
            output_dir: PathBuf::from("data/captures"),
            switch_delay: Duration::from_millis(500),
            preview_timeout: Duration::from_secs(300),
            discard_frames: 2,
            read_retries: 3,
            open_attempts: 2,
            open_backoff: Duration::from_secs(1),
        }
    }
}

/// 摄像头状态
#[derive(Debug, Clone, Serialize)]
pub struct CameraStatus {
    pub mode: CameraMode,
    pub opened: bool,
    pub preview_client_id: Option<String>,
    pub preview_age_secs: Option<u64>,
    pub preview_expired: Option<bool>,
}

struct PreviewSession {
    client_id: String,
    started: Instant,
}

struct Inner {
    mode: CameraMode,
    handle: Option<Box<dyn CameraHandle>>,
    preview: Option<PreviewSession>,
}

impl Inner {
    fn healthy(&self) -> bool {
        self.handle.as_ref().map(|h| h.is_opened()).unwrap_or(false)
    }
}

/// 摄像头仲裁器
pub struct CameraArbiter {
    driver: Arc<dyn CameraDriver>,
    settings: CameraSettings,
    inner: Mutex<Inner>,
}

impl CameraArbiter {
    pub fn new(driver: Arc<dyn CameraDriver>, settings: CameraSettings) -> Self {
        info!(
            "摄像头仲裁器初始化 - 驱动: {}, 索引: {}, 分辨率: {}x{}",
            driver.name(),
            settings.index,
            settings.resolution.0,
            settings.resolution.1
        );
        Self {
            driver,
            settings,
            inner: Mutex::new(Inner {
                mode: CameraMode::None,
                handle: None,
                preview: None,
            }),
        }
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    pub async fn current_mode(&self) -> CameraMode {
        self.inner.lock().await.mode
    }

    /// 切换模式；目标模式与当前相同且句柄正常时不做任何事
    pub async fn switch_to(&self, mode: CameraMode) -> bool {
        let mut inner = self.inner.lock().await;
        self.switch_locked(&mut inner, mode).await
    }

    async fn switch_locked(&self, inner: &mut Inner, mode: CameraMode) -> bool {
        if inner.mode == mode && (mode == CameraMode::None || inner.healthy()) {
            return true;
        }

        info!("切换摄像头模式: {} -> {}", inner.mode, mode);
        release_locked(inner).await;

        if mode == CameraMode::None {
            return true;
        }

        tokio::time::sleep(self.settings.switch_delay).await;

        let attempts = self.settings.open_attempts.max(1);
        for attempt in 1..=attempts {
            match self.open_blocking().await {
                Ok(handle) => {
                    inner.handle = Some(handle);
                    inner.mode = mode;
                    info!("摄像头已打开，当前模式: {}", mode);
                    return true;
                }
                Err(e) => {
                    warn!("打开摄像头失败 (第{}/{}次): {}", attempt, attempts, e);
                    if attempt < attempts {
                        tokio::time::sleep(self.settings.open_backoff * attempt as u32).await;
                    }
                }
            }
        }

        error!("摄像头打开失败，已重试 {} 次", attempts);
        false
    }

    async fn open_blocking(&self) -> Result<Box<dyn CameraHandle>> {
        let driver = self.driver.clone();
        let index = self.settings.index;
        let resolution = self.settings.resolution;
        tokio::task::spawn_blocking(move || driver.open(index, resolution))
            .await
            .map_err(|e| anyhow!("打开摄像头任务异常: {}", e))?
    }

    /// 单次截图，调用方必须先切换到 Capture 模式
    ///
    /// 先丢弃缓冲帧再读取，避免拿到空闲期间积压的旧帧
    pub async fn capture(&self) -> Option<PathBuf> {
        let mut inner = self.inner.lock().await;

        if inner.mode != CameraMode::Capture {
            warn!("截图失败：当前模式为 {}，需要 capture", inner.mode);
            return None;
        }
        let Some(mut handle) = inner.handle.take() else {
            warn!("截图失败：摄像头未打开");
            return None;
        };

        let discard = self.settings.discard_frames;
        let retries = self.settings.read_retries.max(1);
        let joined = tokio::task::spawn_blocking(move || {
            let result = read_fresh_frame(handle.as_mut(), discard, retries);
            (handle, result)
        })
        .await;

        let frame = match joined {
            Ok((handle, result)) => {
                inner.handle = Some(handle);
                result
            }
            Err(e) => {
                // 句柄随任务一起丢失
                inner.mode = CameraMode::None;
                error!("截图任务异常: {}", e);
                return None;
            }
        };

        let frame = match frame {
            Ok(frame) => frame,
            Err(e) => {
                error!("截图失败，已重试 {} 次: {}", retries, e);
                return None;
            }
        };

        match self.save_frame(frame).await {
            Ok(path) => {
                info!("截图成功: {:?}", path);
                Some(path)
            }
            Err(e) => {
                error!("保存截图失败: {}", e);
                None
            }
        }
    }

    async fn save_frame(&self, frame: RgbImage) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.settings.output_dir).await?;
        let path = self
            .settings
            .output_dir
            .join(format!("{}.jpg", chrono::Local::now().timestamp_millis()));

        let quality = self.settings.jpeg_quality;
        let bytes = tokio::task::spawn_blocking(move || encode_jpeg(&frame, quality))
            .await
            .map_err(|e| anyhow!("编码任务异常: {}", e))??;
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// 读取一帧，调用方必须先切换到 Preview 模式
    pub async fn read_frame(&self) -> Option<RgbImage> {
        let mut inner = self.inner.lock().await;
        self.read_frame_locked(&mut inner).await
    }

    async fn read_frame_locked(&self, inner: &mut Inner) -> Option<RgbImage> {
        if inner.mode != CameraMode::Preview {
            debug!("读帧跳过：当前模式为 {}", inner.mode);
            return None;
        }
        let mut handle = inner.handle.take()?;

        match tokio::task::spawn_blocking(move || {
            let result = handle.read();
            (handle, result)
        })
        .await
        {
            Ok((handle, Ok(frame))) => {
                inner.handle = Some(handle);
                Some(frame)
            }
            Ok((handle, Err(e))) => {
                inner.handle = Some(handle);
                warn!("读取预览帧失败: {}", e);
                None
            }
            Err(e) => {
                inner.mode = CameraMode::None;
                error!("读帧任务异常: {}", e);
                None
            }
        }
    }

    /// 客户端请求预览；新的客户端会接管当前预览
    pub async fn start_preview(&self, client_id: &str) -> bool {
        let mut inner = self.inner.lock().await;
        info!("客户端 {} 请求启动预览", client_id);

        if !self.switch_locked(&mut inner, CameraMode::Preview).await {
            error!("切换到预览模式失败");
            return false;
        }

        inner.preview = Some(PreviewSession {
            client_id: client_id.to_string(),
            started: Instant::now(),
        });
        info!("预览模式已启动");
        true
    }

    /// 停止预览并切回 Capture 模式；提供 client_id 时只停止该客户端的预览
    pub async fn stop_preview(&self, client_id: Option<&str>) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.stop_preview_locked(&mut inner, client_id).await
    }

    async fn stop_preview_locked(&self, inner: &mut Inner, client_id: Option<&str>) -> Result<()> {
        if let Some(client_id) = client_id {
            let current = inner.preview.as_ref().map(|p| p.client_id.as_str());
            if current != Some(client_id) {
                return Err(anyhow!("不是当前预览客户端: {}", client_id));
            }
        }

        info!("停止预览模式（客户端: {:?}）", client_id);
        inner.preview = None;

        if inner.mode == CameraMode::Preview
            && !self.switch_locked(inner, CameraMode::Capture).await
        {
            return Err(anyhow!("摄像头切换失败"));
        }
        Ok(())
    }

    fn preview_expired(&self, inner: &Inner) -> bool {
        match &inner.preview {
            Some(session) => session.started.elapsed() > self.settings.preview_timeout,
            None => true,
        }
    }

    /// 为预览客户端读帧；预览超时后自动停止
    pub async fn read_preview_frame(&self) -> Option<RgbImage> {
        let mut inner = self.inner.lock().await;
        if inner.mode != CameraMode::Preview {
            return None;
        }

        if inner.preview.is_some() && self.preview_expired(&inner) {
            info!("预览超时，自动停止");
            if let Err(e) = self.stop_preview_locked(&mut inner, None).await {
                warn!("自动停止预览失败: {}", e);
            }
            return None;
        }

        self.read_frame_locked(&mut inner).await
    }

    pub async fn status(&self) -> CameraStatus {
        let inner = self.inner.lock().await;
        CameraStatus {
            mode: inner.mode,
            opened: inner.healthy(),
            preview_client_id: inner.preview.as_ref().map(|p| p.client_id.clone()),
            preview_age_secs: inner.preview.as_ref().map(|p| p.started.elapsed().as_secs()),
            preview_expired: (inner.mode == CameraMode::Preview)
                .then(|| self.preview_expired(&inner)),
        }
    }

    /// 结束预览并释放摄像头；重复调用安全
    pub async fn shutdown(&self) {
        let mut inner = self.inner.lock().await;
        if inner.preview.take().is_some() {
            info!("关闭摄像头前结束预览会话");
        }
        release_locked(&mut inner).await;
        debug!("摄像头已关闭");
    }
}

async fn release_locked(inner: &mut Inner) {
    if let Some(mut handle) = inner.handle.take() {
        if let Err(e) = tokio::task::spawn_blocking(move || handle.release()).await {
            warn!("释放摄像头任务异常: {}", e);
        }
    }
    inner.mode = CameraMode::None;
}

fn read_fresh_frame(
    handle: &mut dyn CameraHandle,
    discard: usize,
    retries: usize,
) -> Result<RgbImage> {
    for _ in 0..discard {
        let _ = handle.read();
    }

    let mut last_error = anyhow!("未读取到帧");
    for attempt in 1..=retries {
        match handle.read() {
            Ok(frame) => return Ok(frame),
            Err(e) => {
                debug!("读帧失败 (第{}/{}次): {}", attempt, retries, e);
                last_error = e;
            }
        }
    }
    Err(last_error)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 测试用驱动：统计打开、读取次数以及并发读取数
    #[derive(Default)]
    pub struct FakeDriver {
        pub opens: AtomicUsize,
        pub releases: Arc<AtomicUsize>,
        pub reads: Arc<AtomicUsize>,
        pub active: Arc<AtomicUsize>,
        pub max_active: Arc<AtomicUsize>,
        /// 前 N 次打开失败
        pub fail_opens: AtomicUsize,
        /// 读帧耗时
        pub read_delay_ms: u64,
    }

    struct FakeHandle {
        opened: bool,
        releases: Arc<AtomicUsize>,
        reads: Arc<AtomicUsize>,
        active: Arc<AtomicUsize>,
        max_active: Arc<AtomicUsize>,
        read_delay_ms: u64,
    }

    impl CameraHandle for FakeHandle {
        fn read(&mut self) -> Result<RgbImage> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(self.read_delay_ms));
            let n = self.reads.fetch_add(1, Ordering::SeqCst) as u8;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(RgbImage::from_pixel(8, 8, image::Rgb([n, n, n])))
        }

        fn is_opened(&self) -> bool {
            self.opened
        }

        fn release(&mut self) {
            self.opened = false;
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CameraDriver for FakeDriver {
        fn open(&self, _index: usize, _resolution: (u32, u32)) -> Result<Box<dyn CameraHandle>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            if self
                .fail_opens
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(anyhow!("设备忙"));
            }
            Ok(Box::new(FakeHandle {
                opened: true,
                releases: self.releases.clone(),
                reads: self.reads.clone(),
                active: self.active.clone(),
                max_active: self.max_active.clone(),
                read_delay_ms: self.read_delay_ms,
            }))
        }

        fn name(&self) -> &'static str {
            "fake"
        }
    }

    pub fn fast_settings(output_dir: PathBuf) -> CameraSettings {
        CameraSettings {
            output_dir,
            switch_delay: Duration::from_millis(1),
            open_backoff: Duration::from_millis(1),
            ..CameraSettings::default()
        }
    }
}
