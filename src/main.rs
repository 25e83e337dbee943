use genrelay::config::{load_config, AppConfig};
use genrelay::observability::init_tracing;
use genrelay::service::{GenerationService, TextGenerationArgs};
use genrelay::stream::TracingSink;

const DEFAULT_CONFIG_PATH: &str = "config.yaml";
const CONFIG_PATH_ENV: &str = "GENRELAY_CONFIG";

struct CliArgs {
    model: Option<String>,
    prompt: String,
}

fn main() {
    let args = parse_args(std::env::args().skip(1)).unwrap_or_else(|msg| {
        eprintln!("{msg}");
        eprintln!("Usage: genrelay [--model <id>] <prompt...>");
        std::process::exit(2);
    });

    let config_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let config = load_config(&config_path).unwrap_or_else(|e| {
        eprintln!("Failed to load configuration from '{config_path}': {e}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    if let Err(code) = runtime.block_on(run(&config, args)) {
        std::process::exit(code);
    }
}

async fn run(config: &AppConfig, args: CliArgs) -> Result<(), i32> {
    let service = GenerationService::from_config(config).map_err(|e| {
        eprintln!("Failed to initialize provider: {e}");
        1
    })?;

    let mut request = TextGenerationArgs::new(args.prompt);
    if let Some(model) = args.model {
        request = request.with_model(model);
    }

    let result = service
        .generate_text(request, TracingSink)
        .await
        .map_err(|e| {
            eprintln!("{}", e.category().notice());
            eprintln!("Generation failed: {e}");
            1
        })?;

    println!("{}", result.text);
    if let Some(usage) = result.usage {
        match serde_json::to_string(&usage) {
            Ok(json) => println!("{json}"),
            Err(e) => tracing::warn!(error = %e, "failed to encode usage"),
        }
    }
    Ok(())
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs, String> {
    let mut model = None;
    let mut words = Vec::new();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--model" | "-m" => {
                model = Some(args.next().ok_or("--model requires a value")?);
            }
            "--" => {
                words.extend(args.by_ref());
            }
            _ => words.push(arg),
        }
    }
    let prompt = words.join(" ");
    if prompt.trim().is_empty() {
        return Err("missing prompt".to_string());
    }
    Ok(CliArgs { model, prompt })
}
