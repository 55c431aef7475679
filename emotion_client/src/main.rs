use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use emotion_client::client::EmotionClient;
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address of the emotion service to connect to
    #[clap(long, default_value = "127.0.0.1:5001")]
    address: String,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query the service health
    Health,

    /// Detect the emotion of the most prominent face in an image
    Face { image: PathBuf },

    /// Detect the emotions of all faces in an image
    Batch { image: PathBuf },

    /// Detect the emotion of a speech clip
    Speech {
        audio: PathBuf,

        /// Send the file as multipart upload instead of base64 JSON
        #[clap(long)]
        upload: bool,
    },

    /// Detect and fuse emotions of an image and a speech clip
    Multimodal {
        #[clap(long)]
        image: Option<PathBuf>,

        #[clap(long)]
        audio: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let client = EmotionClient::new(&args.address);
    log::info!("Sending {:?} to {}", &args.command, &args.address);

    let response = match &args.command {
        Command::Health => client.health().await?,
        Command::Face { image } => client.detect_face(image, false).await?,
        Command::Batch { image } => client.detect_face(image, true).await?,
        Command::Speech { audio, upload } => client.detect_speech(audio, *upload).await?,
        Command::Multimodal { image, audio } => {
            if image.is_none() && audio.is_none() {
                bail!("multimodal detection needs --image, --audio or both");
            }
            client
                .detect_multimodal(image.as_deref(), audio.as_deref())
                .await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&response)?);

    Ok(())
}
