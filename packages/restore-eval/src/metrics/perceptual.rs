//! Learned perceptual distance as an injected capability.
//!
//! The evaluator never talks to a model directly. It normalizes both rasters
//! into [`SignedUnitImage`]s and hands them to a [`PerceptualDistance`]
//! implementation through a [`PerceptualHandle`], which serializes calls and
//! bounds each one with a timeout.
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use image::RgbImage;
use tokio::sync::Mutex;
use tokio::time::{timeout_at, Instant};

use crate::error::{EvalError, Result};

const BACKEND: &str = "perceptual";

/// Feature network behind the learned distance. Only changes which model
/// computes the score, never its contract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PerceptualBackbone {
    #[default]
    Alex,
    Vgg,
    Squeeze,
}

impl PerceptualBackbone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Alex => "alex",
            Self::Vgg => "vgg",
            Self::Squeeze => "squeeze",
        }
    }

    /// Conventional ONNX export name for this backbone inside a model directory.
    pub fn model_file_name(&self) -> String {
        format!("lpips_{}.onnx", self.as_str())
    }

    pub fn default_model_path(&self, model_dir: &Path) -> std::path::PathBuf {
        model_dir.join(self.model_file_name())
    }
}

/// A raster in planar CHW layout with samples mapped from `0..=255` to `-1..=1`.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedUnitImage {
    pub width: usize,
    pub height: usize,
    pub data: Vec<f32>,
}

impl SignedUnitImage {
    pub fn from_rgb(image: &RgbImage) -> Self {
        let (width, height) = (image.width() as usize, image.height() as usize);
        let plane = width * height;
        let mut data = vec![0.0f32; plane * 3];
        for (i, pixel) in image.pixels().enumerate() {
            for channel in 0..3 {
                data[channel * plane + i] = f32::from(pixel[channel]) / 255.0 * 2.0 - 1.0;
            }
        }
        Self {
            width,
            height,
            data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Distance between two normalized rasters of identical size. Lower means
/// more similar.
pub trait PerceptualDistance: Send {
    fn distance(&mut self, a: &SignedUnitImage, b: &SignedUnitImage) -> Result<f32>;
}

/// Shared, call-serialized access to a single perceptual backend.
///
/// Waiting for the backend and running the call share one deadline. A call
/// that overruns while running cannot be interrupted, so the backend is then
/// marked stalled and every later call fails immediately.
#[derive(Clone)]
pub struct PerceptualHandle {
    backend: Arc<Mutex<Box<dyn PerceptualDistance>>>,
    timeout: Duration,
    stalled: Arc<AtomicBool>,
}

impl PerceptualHandle {
    pub fn new(backend: Box<dyn PerceptualDistance>, timeout: Duration) -> Self {
        Self {
            backend: Arc::new(Mutex::new(backend)),
            timeout,
            stalled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// True once a call has overrun its deadline while holding the backend.
    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::SeqCst)
    }

    /// Normalizes both rasters and runs one backend call on the blocking pool.
    pub async fn distance(&self, a: &RgbImage, b: &RgbImage) -> Result<f64> {
        if a.dimensions() != b.dimensions() {
            return Err(EvalError::metric("perceptual", "dimension mismatch"));
        }
        if self.is_stalled() {
            return Err(EvalError::dependency(
                BACKEND,
                "backend still busy with a call that timed out",
            ));
        }
        let a = SignedUnitImage::from_rgb(a);
        let b = SignedUnitImage::from_rgb(b);
        if a.is_empty() {
            return Err(EvalError::metric("perceptual", "empty image"));
        }

        let deadline = Instant::now() + self.timeout;
        let expired = || EvalError::dependency(BACKEND, format!("no answer within {:?}", self.timeout));

        let mut guard = timeout_at(deadline, self.backend.clone().lock_owned())
            .await
            .map_err(|_| expired())?;
        if self.is_stalled() {
            return Err(EvalError::dependency(
                BACKEND,
                "backend still busy with a call that timed out",
            ));
        }
        let mut call = tokio::task::spawn_blocking(move || guard.distance(&a, &b));
        let value = match timeout_at(deadline, &mut call).await {
            Ok(joined) => joined.map_err(|e| EvalError::dependency(BACKEND, e))??,
            Err(_) => {
                self.stalled.store(true, Ordering::SeqCst);
                tracing::warn!(timeout = ?self.timeout, "perceptual backend stalled; remaining scores will be absent");
                return Err(expired());
            }
        };

        if !value.is_finite() {
            return Err(EvalError::dependency(
                BACKEND,
                format!("non-finite distance {value}"),
            ));
        }
        Ok(f64::from(value))
    }
}

#[cfg(feature = "onnx")]
pub use onnx::OnnxPerceptualDistance;

#[cfg(feature = "onnx")]
mod onnx {
    use std::path::Path;

    use ndarray::Array4;
    use ort::session::Session;
    use ort::value::TensorRef;
    use tracing::info;

    use super::{PerceptualBackbone, PerceptualDistance, SignedUnitImage, BACKEND};
    use crate::error::{EvalError, Result};

    /// LPIPS-style ONNX export: two `1x3xHxW` inputs in `[-1, 1]`, one scalar output.
    pub struct OnnxPerceptualDistance {
        session: Session,
        backbone: PerceptualBackbone,
    }

    impl OnnxPerceptualDistance {
        pub fn new(model_path: &Path, backbone: PerceptualBackbone) -> Result<Self> {
            info!(model = %model_path.display(), backbone = backbone.as_str(), "loading perceptual model");
            let session = Session::builder()
                .map_err(|e| EvalError::dependency(BACKEND, e))?
                .commit_from_file(model_path)
                .map_err(|e| EvalError::dependency(BACKEND, e))?;
            Ok(Self { session, backbone })
        }

        pub fn backbone(&self) -> PerceptualBackbone {
            self.backbone
        }
    }

    fn to_tensor(image: &SignedUnitImage) -> Result<Array4<f32>> {
        Array4::from_shape_vec((1, 3, image.height, image.width), image.data.clone())
            .map_err(|e| EvalError::dependency(BACKEND, e))
    }

    impl PerceptualDistance for OnnxPerceptualDistance {
        fn distance(&mut self, a: &SignedUnitImage, b: &SignedUnitImage) -> Result<f32> {
            let a = to_tensor(a)?;
            let b = to_tensor(b)?;
            let a = TensorRef::from_array_view(a.view())
                .map_err(|e| EvalError::dependency(BACKEND, e))?;
            let b = TensorRef::from_array_view(b.view())
                .map_err(|e| EvalError::dependency(BACKEND, e))?;

            let outputs = self
                .session
                .run(ort::inputs![a, b])
                .map_err(|e| EvalError::dependency(BACKEND, e))?;
            let (_, values) = outputs[0]
                .try_extract_tensor::<f32>()
                .map_err(|e| EvalError::dependency(BACKEND, e))?;
            values
                .first()
                .copied()
                .ok_or_else(|| EvalError::dependency(BACKEND, "model returned an empty tensor"))
        }
    }
}
