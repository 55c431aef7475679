//! Speech emotion service binary.
//!
use anyhow::Result;
use clap::Parser;
use emotion_server::{
    config::{parse_address, ServerArgs, SpeechModelArgs},
    meter::spawn_meter_logger,
    routes::speech_router,
};
use env_logger::TimestampPrecision;

#[derive(Parser, Debug)]
#[clap(author, version)]
struct Args {
    /// Address to serve HTTP on
    #[clap(long, default_value = "0.0.0.0:5002")]
    server_address: String,

    #[clap(flatten)]
    server: ServerArgs,

    #[clap(flatten)]
    speech: SpeechModelArgs,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Setup logger
    env_logger::builder()
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let analyzer = args.speech.load()?;

    spawn_meter_logger();

    let app = speech_router(analyzer, args.server.max_body_bytes);

    let addr = parse_address(&args.server_address)?;
    log::info!("Speech emotion service listening on {addr}");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
