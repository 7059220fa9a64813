use crate::object_detection::ort_inference_session::Device;
use crate::pipeline::detect_and_classify::PipelineConfig;
use crate::pipeline::model_provider::ModelPaths;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

/// Detect beverage products on shelf photos and name them.
#[derive(Debug, Parser)]
#[command(name = "beverage-vision", version, about)]
pub struct Args {
    #[command(flatten)]
    pub models: ModelArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Model files and thresholds. Every flag can also come from the environment.
#[derive(Clone, Debug, ClapArgs)]
pub struct ModelArgs {
    /// Detector weights (ONNX).
    #[arg(long, env = "DET_WT", default_value = "models/detector.onnx", global = true)]
    pub det_weights: PathBuf,

    /// Embedding network (ONNX).
    #[arg(long, env = "CLS_EMB", default_value = "models/embedder.onnx", global = true)]
    pub cls_embed: PathBuf,

    /// Prototype catalog: a JSON list of {label, embedding}.
    #[arg(long, env = "CLS_PROTOS", default_value = "models/prototypes.json", global = true)]
    pub cls_protos: PathBuf,

    /// Similarity thresholds: {"tau": .., "per_label": {..}}.
    #[arg(long, env = "CLS_TAU", default_value = "models/tau.json", global = true)]
    pub cls_tau: PathBuf,

    #[arg(long, env = "CONF_THR", default_value_t = 0.60, value_parser = parse_unit_interval, global = true)]
    pub conf_thr: f32,

    #[arg(long, env = "IOU_THR", default_value_t = 0.50, value_parser = parse_unit_interval, global = true)]
    pub iou_thr: f32,

    /// Smallest accepted box side, in pixels.
    #[arg(long, env = "MIN_BOX", default_value_t = 10, value_parser = parse_min_box, global = true)]
    pub min_box: i32,

    /// Smallest accepted confidence times similarity.
    #[arg(long, env = "MIN_FINAL", default_value_t = 0.25, value_parser = parse_unit_interval, global = true)]
    pub min_final: f32,

    #[arg(long, env = "MAX_DET", default_value_t = 100, global = true)]
    pub max_det: usize,

    /// Square detector input size.
    #[arg(long, env = "DET_IMGSZ", default_value_t = 1280, global = true)]
    pub det_imgsz: u32,

    /// Square embedder input size.
    #[arg(long, env = "CLS_IMGSZ", default_value_t = 224, global = true)]
    pub cls_imgsz: u32,

    #[arg(long, env = "DEVICE", value_enum, default_value_t = Device::Cpu, global = true)]
    pub device: Device,

    /// Optional JSON object mapping catalog labels to display names.
    #[arg(long, env = "DISPLAY_NAMES", global = true)]
    pub display_names: Option<PathBuf>,
}

impl ModelArgs {
    pub fn model_paths(&self) -> ModelPaths {
        ModelPaths {
            detector: self.det_weights.clone(),
            embedder: self.cls_embed.clone(),
            prototypes: self.cls_protos.clone(),
            tau: self.cls_tau.clone(),
            detector_input_size: self.det_imgsz,
            embedder_input_size: self.cls_imgsz,
            device: self.device,
        }
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            conf_thr: self.conf_thr,
            iou_thr: self.iou_thr,
            max_det: self.max_det,
            min_box: self.min_box,
            min_final: self.min_final,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Run the pipeline over image files and print one JSON line per image.
    Scan(ScanArgs),
}

#[derive(Debug, ClapArgs)]
pub struct ServeArgs {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 8083)]
    pub port: u16,

    /// Allowed CORS origins, comma separated. Any origin when empty.
    #[arg(long = "cors-origin", env = "CORS_ORIGINS", value_delimiter = ',')]
    pub cors_origins: Vec<String>,
}

impl ServeArgs {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, ClapArgs)]
pub struct ScanArgs {
    /// Image files or directories to walk.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Also report the detection nearest the frame center.
    #[arg(long)]
    pub nearest: bool,
}

fn parse_unit_interval(value: &str) -> Result<f32, String> {
    let parsed: f32 = value
        .parse()
        .map_err(|_| format!("`{value}` is not a number"))?;
    if (0.0..=1.0).contains(&parsed) {
        Ok(parsed)
    } else {
        Err(format!("`{value}` is not in [0, 1]"))
    }
}

fn parse_min_box(value: &str) -> Result<i32, String> {
    let parsed: i32 = value
        .parse()
        .map_err(|_| format!("`{value}` is not an integer"))?;
    if parsed >= 1 {
        Ok(parsed)
    } else {
        Err(format!("`{value}` must be at least 1"))
    }
}
