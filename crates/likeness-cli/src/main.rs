use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use likeness_core::normalizer::DEFAULT_FACE_SIZE;
use likeness_core::{
    DetectorParams, EigenfaceParams, FaceDetector, FsImageStore, ImageStore, PipelineConfig,
    RecognitionPipeline,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "likeness", about = "Likeness face gallery CLI", version)]
struct Cli {
    #[command(flatten)]
    gallery: GalleryArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct GalleryArgs {
    /// Data directory (default: $XDG_DATA_HOME/likeness)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
    /// SeetaFace detector model (default: <data>/models/seeta_fd_frontal_v1.0.bin)
    #[arg(long, global = true)]
    model: Option<PathBuf>,
    /// Side of the canonical face in pixels
    #[arg(long, global = true, default_value_t = DEFAULT_FACE_SIZE)]
    face_size: u32,
    /// Smallest face searched for (at least 20)
    #[arg(long, global = true, default_value_t = DetectorParams::default().min_face_size)]
    min_face: u32,
    #[arg(long, global = true, default_value_t = DetectorParams::default().score_threshold)]
    score_threshold: f64,
    #[arg(long, global = true, default_value_t = DetectorParams::default().pyramid_scale_factor)]
    pyramid_scale: f32,
    #[arg(long, global = true, default_value_t = DetectorParams::default().window_step)]
    window_step: u32,
    /// Eigenfaces kept after training (0 = all)
    #[arg(long, global = true, default_value_t = 0)]
    max_components: usize,
    /// Report matches farther than this as "Unknown"
    #[arg(long, global = true)]
    distance_threshold: Option<f64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Store the largest face in a photo for a user and retrain
    Learn {
        /// User to store the face under
        #[arg(short, long)]
        user: String,
        /// Photo containing the user's face
        image: PathBuf,
    },
    /// Identify every face in a photo (JSON, best match first)
    Detect {
        image: PathBuf,
    },
    /// Retrain from the gallery and print model statistics
    Train,
    /// List users with their sample counts
    Users,
}

impl GalleryArgs {
    fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(likeness_core::default_data_dir)
    }

    fn store(&self) -> FsImageStore {
        FsImageStore::new(
            likeness_core::default_users_dir(&self.data_dir()),
            (self.face_size, self.face_size),
        )
    }

    fn pipeline(&self) -> Result<RecognitionPipeline<FsImageStore>> {
        let model = self
            .model
            .clone()
            .unwrap_or_else(|| likeness_core::default_model_path(&self.data_dir()));
        let params = DetectorParams {
            min_face_size: self.min_face,
            score_threshold: self.score_threshold,
            pyramid_scale_factor: self.pyramid_scale,
            window_step: self.window_step,
        };
        let detector = FaceDetector::load(&model, params)
            .with_context(|| format!("failed to load detector model {}", model.display()))?;

        let config = PipelineConfig {
            face_size: (self.face_size, self.face_size),
            eigenfaces: EigenfaceParams {
                max_components: self.max_components,
                distance_threshold: self.distance_threshold,
            },
        };
        Ok(RecognitionPipeline::new(Arc::new(detector), self.store(), config))
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    anyhow::ensure!(cli.gallery.face_size > 0, "--face-size must be positive");

    match cli.command {
        Commands::Learn { user, image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let outcome = cli.gallery.pipeline()?.learn_face(&user, &bytes)?;
            let r = outcome.region;
            println!(
                "Learned {} from {} (face at {},{} {}x{}); key {}",
                outcome.user,
                image.display(),
                r.x,
                r.y,
                r.width,
                r.height,
                outcome.key
            );
            println!("Gallery: {} samples", outcome.gallery_samples);
        }
        Commands::Detect { image } => {
            let bytes = std::fs::read(&image)
                .with_context(|| format!("failed to read {}", image.display()))?;
            let results = cli.gallery.pipeline()?.detect_faces(&bytes)?;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
        Commands::Train => {
            let started = Instant::now();
            let state = cli.gallery.pipeline()?.retrain()?;
            println!(
                "Trained on {} samples from {} users: {} eigenfaces ({} ms)",
                state.sample_count(),
                state.labels().len(),
                state.model().component_count(),
                started.elapsed().as_millis()
            );
        }
        Commands::Users => {
            let store = cli.gallery.store();
            let users = store.list_users()?;
            if users.is_empty() {
                println!("No users in {}", store.root().display());
            }
            for user in users {
                println!("{user}\t{}", store.sample_keys(&user)?.len());
            }
        }
    }

    Ok(())
}
