use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use facekit_core::pipeline;
use facekit_core::ImageSource;
use facekit_models::{
    ArcFaceRecognizer, GenderAgeModel, MeshModel, MeshPipeline, ModelError, ModelPaths,
    ScrfdConfig, ScrfdDetector, YoloConfig, YoloPersonDetector,
};
use serde_json::{json, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facekit", about = "facekit face and image analytics CLI")]
struct Cli {
    /// Directory containing ONNX models (default: $FACEKIT_MODEL_DIR or the data dir)
    #[arg(long, global = true)]
    model_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct ImageArgs {
    /// Image file (PNG, JPEG, ...)
    #[arg(short, long)]
    file: Option<PathBuf>,
    /// Base64 image, optionally a data URL
    #[arg(short, long)]
    base64: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Score an enrollment photo (sharpness, lighting, angle)
    Quality(ImageArgs),
    /// Detect faces with bounding boxes
    Detect(ImageArgs),
    /// Extract 468-point landmarks and geometric embeddings
    Extract(ImageArgs),
    /// Detection, embedding, age, gender and expression per face
    Analyze(ImageArgs),
    /// Count people
    Count(ImageArgs),
    /// ArcFace embedding of the most confident face
    Embed(ImageArgs),
    /// Cosine similarity of two embeddings given as JSON arrays
    Compare { a: String, b: String },
    /// Query the running daemon
    Status {
        /// Use the session bus instead of the system bus
        #[arg(long)]
        session: bool,
    },
}

#[zbus::proxy(
    interface = "io.facekit.Analytics1",
    default_service = "io.facekit.Analytics1",
    default_path = "/io/facekit/Analytics1"
)]
trait Analytics {
    async fn health(&self) -> zbus::Result<String>;
}

/// Raw image bytes or base64 text, owned for the duration of the command.
enum ImageInput {
    Bytes(Vec<u8>),
    Base64(String),
}

impl ImageInput {
    fn read(args: ImageArgs) -> Result<Self> {
        match (args.file, args.base64) {
            (Some(path), _) => {
                let bytes = std::fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
                Ok(ImageInput::Bytes(bytes))
            }
            (None, Some(text)) => Ok(ImageInput::Base64(text)),
            (None, None) => anyhow::bail!("either --file or --base64 is required"),
        }
    }

    fn source(&self) -> ImageSource<'_> {
        match self {
            ImageInput::Bytes(bytes) => ImageSource::Bytes(bytes),
            ImageInput::Base64(text) => ImageSource::Base64(text),
        }
    }
}

fn render<T: serde::Serialize>(result: Result<T, facekit_core::PipelineError>) -> Result<Value> {
    Ok(match result {
        Ok(value) => serde_json::to_value(value)?,
        Err(e) => json!({ "error": e.to_string() }),
    })
}

fn model_dir(cli_value: Option<PathBuf>) -> PathBuf {
    cli_value
        .or_else(|| std::env::var_os("FACEKIT_MODEL_DIR").map(PathBuf::from))
        .unwrap_or_else(facekit_models::default_model_dir)
}

fn load_detector(paths: &ModelPaths) -> Result<ScrfdDetector, ModelError> {
    ScrfdDetector::load(&paths.scrfd(), ScrfdConfig::default())
}

fn optional_attributes(paths: &ModelPaths) -> Result<Option<GenderAgeModel>> {
    match GenderAgeModel::load(&paths.genderage(), 2) {
        Ok(model) => Ok(Some(model)),
        Err(ModelError::ModelNotFound(path)) => {
            tracing::warn!(path, "gender/age model not found; attributes disabled");
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = ModelPaths::new(model_dir(cli.model_dir));

    let output = match cli.command {
        Commands::Quality(args) => {
            let input = ImageInput::read(args)?;
            let mut detector = load_detector(&paths)?;
            serde_json::to_value(pipeline::assess_image_quality(input.source(), &mut detector))?
        }
        Commands::Detect(args) => {
            let input = ImageInput::read(args)?;
            let mut detector = load_detector(&paths)?;
            render(pipeline::detect_faces(input.source(), &mut detector))?
        }
        Commands::Extract(args) => {
            let input = ImageInput::read(args)?;
            let mesh = MeshModel::load(&paths.face_mesh(), 2)?;
            let mut pipeline_models = MeshPipeline::new(load_detector(&paths)?, mesh, 10);
            render(pipeline::extract_landmarks_and_embedding(input.source(), &mut pipeline_models))?
        }
        Commands::Analyze(args) => {
            let input = ImageInput::read(args)?;
            let mut detector = load_detector(&paths)?;
            let mut recognizer = ArcFaceRecognizer::load(&paths.arcface(), 2)?;
            let mut attributes = optional_attributes(&paths)?;
            let faces = pipeline::analyze_faces(
                input.source(),
                &mut detector,
                &mut recognizer,
                attributes.as_mut(),
            );
            render(faces.map(|faces| json!({ "success": true, "faces": faces })))?
        }
        Commands::Count(args) => {
            let input = ImageInput::read(args)?;
            let mut people = YoloPersonDetector::load(&paths.yolo(), YoloConfig::default())?;
            render(pipeline::count_people(input.source(), &mut people))?
        }
        Commands::Embed(args) => {
            let input = ImageInput::read(args)?;
            let mut detector = load_detector(&paths)?;
            let mut recognizer = ArcFaceRecognizer::load(&paths.arcface(), 2)?;
            render(pipeline::extract_embedding(input.source(), &mut detector, &mut recognizer))?
        }
        Commands::Compare { a, b } => {
            let a: Vec<f32> = serde_json::from_str(&a).context("parsing first embedding")?;
            let b: Vec<f32> = serde_json::from_str(&b).context("parsing second embedding")?;
            json!({ "similarity": pipeline::compare_embeddings(&a, &b) })
        }
        Commands::Status { session } => {
            let conn = if session {
                zbus::Connection::session().await
            } else {
                zbus::Connection::system().await
            };
            match conn {
                Ok(conn) => {
                    let proxy = AnalyticsProxy::new(&conn).await?;
                    match proxy.health().await {
                        Ok(body) => serde_json::from_str(&body)?,
                        Err(e) => json!({ "status": "unreachable", "error": e.to_string() }),
                    }
                }
                Err(e) => json!({ "status": "unreachable", "error": e.to_string() }),
            }
        }
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    if output.get("error").is_some() {
        std::process::exit(1);
    }
    Ok(())
}
