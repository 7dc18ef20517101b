use anyhow::Result;
use clap::Parser;
use genbroker::dispatch::Dispatcher;
use genbroker::models::{GenerationRequest, Payload};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "genbroker")]
#[command(about = "Dispatch a single image generation request")]
struct CliArgs {
    /// User id the request is charged to.
    #[arg(value_name = "USER_ID")]
    user_id: i64,

    /// What to generate.
    #[arg(value_name = "PROMPT")]
    prompt: String,

    /// Pin a specific model instead of the policy's pick.
    #[arg(long, value_name = "MODEL")]
    model: Option<String>,

    /// Treat the prompt as an edit instruction for an existing photo.
    #[arg(long)]
    edit: bool,

    /// Where to write generated image bytes.
    #[arg(long, value_name = "PATH", default_value = "output.jpg")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "genbroker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = CliArgs::parse();

    let dispatcher = match Dispatcher::new() {
        Ok(dispatcher) => dispatcher,
        Err(e) => {
            error!("Failed to initialize dispatcher: {}", e);
            std::process::exit(1);
        }
    };

    let mut request = GenerationRequest::new(args.user_id, args.prompt);
    if let Some(model) = args.model {
        request = request.with_model(model);
    }
    if args.edit {
        request = request.as_image_edit(None);
    }

    match dispatcher.request_generation(request).await {
        Ok(result) if result.success => {
            match result.payload {
                Some(Payload::Bytes(bytes)) => {
                    tokio::fs::write(&args.output, &bytes).await?;
                    info!(
                        "Generated with {} ({} bytes) -> {}",
                        result.model_used.as_deref().unwrap_or("unknown"),
                        bytes.len(),
                        args.output.display()
                    );
                }
                Some(Payload::Url(url)) => {
                    info!(
                        "Generated with {}: {}",
                        result.model_used.as_deref().unwrap_or("unknown"),
                        url
                    );
                    println!("{}", url);
                }
                None => info!("Generation reported success with no payload"),
            }
            Ok(())
        }
        Ok(result) => {
            error!(
                "Generation refused: {}",
                result
                    .error_message
                    .as_deref()
                    .unwrap_or("no error message")
            );
            std::process::exit(1);
        }
        Err(e) => {
            error!("Generation failed: {}", e);
            std::process::exit(1);
        }
    }
}
