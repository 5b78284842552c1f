use anyhow::{anyhow, Result};
use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use shorts_assistant::cli::{run_chat_loop, ChatExit};
use shorts_assistant::processing::require_api_key;
use shorts_assistant::{create_service, AnalysisPipeline, Config, SessionState, Suggestion, VideoStager};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("YouTube Shorts Assistant")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Gemini-powered title, description and tag suggestions for YouTube Shorts")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(clap::ArgAction::SetTrue)
                .global(true)
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (defaults to the standard search paths)")
                .global(true)
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("serve")
                .about("Start the web UI and JSON API")
                .arg(
                    Arg::new("host")
                        .long("host")
                        .value_name("HOST")
                        .help("Address to bind")
                )
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("Port to listen on")
                )
        )
        .subcommand(
            Command::new("analyze")
                .about("Analyze a local MP4 and chat about the result")
                .arg(
                    Arg::new("video")
                        .short('f')
                        .long("video")
                        .value_name("FILE")
                        .help("MP4 file to analyze")
                        .required(true)
                )
                .arg(
                    Arg::new("api-key")
                        .short('k')
                        .long("api-key")
                        .value_name("KEY")
                        .help("Gemini API key (falls back to GEMINI_API_KEY)")
                )
                .arg(
                    Arg::new("no-chat")
                        .long("no-chat")
                        .help("Exit after printing the suggestions")
                        .action(clap::ArgAction::SetTrue)
                )
        )
        .subcommand(
            Command::new("config")
                .about("Show the effective configuration")
                .arg(
                    Arg::new("write")
                        .short('w')
                        .long("write")
                        .value_name("FILE")
                        .help("Also write it as TOML to FILE")
                )
        )
        .get_matches();

    let verbose = matches.get_flag("verbose");
    let loaded = match matches.get_one::<String>("config") {
        Some(path) => Config::from_file(&PathBuf::from(path)),
        None => Config::load(),
    };

    let log_level = match &loaded {
        _ if verbose => "debug".to_string(),
        Ok(config) => config.logging.log_level.clone(),
        Err(_) => "info".to_string(),
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("shorts_assistant={},warn", log_level)));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = loaded.unwrap_or_else(|e| {
        warn!("Failed to load config, using defaults: {}", e);
        Config::default()
    });

    if verbose {
        info!("Verbose logging enabled");
        info!("{}", config.summary());
    }

    match matches.subcommand() {
        Some(("serve", args)) => serve(config, args).await,
        Some(("analyze", args)) => analyze(config, args).await,
        Some(("config", args)) => show_config(config, args),
        _ => Err(anyhow!("Unknown command")),
    }
}

#[cfg(feature = "api")]
async fn serve(mut config: Config, args: &ArgMatches) -> Result<()> {
    use shorts_assistant::api::{ApiServer, AppState};

    if let Some(host) = args.get_one::<String>("host") {
        config.server.host = host.clone();
    }
    if let Some(port) = args.get_one::<String>("port") {
        config.server.port = port.parse()?;
    }

    info!("🚀 YouTube Shorts Assistant starting...");
    if config.gemini.api_key.is_none() {
        info!("🔑 No server-side API key; each request must supply one");
    }

    let pipeline = AnalysisPipeline::from_config(&config).await?;
    ApiServer::new(AppState::new(config, pipeline)).start().await
}

#[cfg(not(feature = "api"))]
async fn serve(_config: Config, _args: &ArgMatches) -> Result<()> {
    Err(anyhow!("This build has no web server; rebuild with the `api` feature"))
}

async fn analyze(config: Config, args: &ArgMatches) -> Result<()> {
    let video_path = PathBuf::from(args.get_one::<String>("video").ok_or_else(|| anyhow!("--video is required"))?);
    let api_key = require_api_key(
        args.get_one::<String>("api-key")
            .map(String::as_str)
            .or(config.gemini.api_key.as_deref()),
    )?
    .to_string();

    if !video_path.exists() {
        error!("Video file does not exist: {}", video_path.display());
        return Err(anyhow!("Video file not found"));
    }

    let service = create_service(&config.gemini, &api_key)?;
    let pipeline = AnalysisPipeline::from_config(&config).await?;
    let stager = VideoStager::new(config.video.clone());
    let staged = stager.stage_path(&video_path).await?;

    let cancel = CancellationToken::new();
    let on_ctrl_c = cancel.clone();
    let listener = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Cancelling analysis...");
            on_ctrl_c.cancel();
        }
    });

    let mut session = SessionState::new();
    let start_time = std::time::Instant::now();
    let result = pipeline
        .analyze_into(service.as_ref(), &mut session, staged, &cancel)
        .await;
    listener.abort();
    let analysis = result?;
    info!("🎉 Analysis completed in {:.2}s", start_time.elapsed().as_secs_f64());

    println!("\n📝 生成結果\n\n{}\n", analysis.text);

    let suggestion = Suggestion::parse(&analysis.text);
    if let Some(title) = &suggestion.title {
        if suggestion.title_within_limit() == Some(false) {
            warn!("Suggested title is {} characters long", title.chars().count());
        }
    }
    if !suggestion.tags.is_empty() {
        println!("🏷️  {}\n", suggestion.tags.join(", "));
    }

    if args.get_flag("no-chat") {
        return Ok(());
    }

    println!("🤖 壁打ち・相談チャット (\"exit\" または Ctrl-C で終了)");
    let exit = run_chat_loop(
        &pipeline,
        service.as_ref(),
        &mut session,
        BufReader::new(tokio::io::stdin()),
        &mut tokio::io::stdout(),
        || async {
            let _ = tokio::signal::ctrl_c().await;
        },
    )
    .await?;
    info!("👋 Chat ended ({:?})", exit);

    if exit == ChatExit::Interrupted {
        // A pending stdin read would keep the runtime from shutting down
        std::process::exit(0);
    }
    Ok(())
}

fn show_config(config: Config, args: &ArgMatches) -> Result<()> {
    println!("{}", config.summary());
    if let Some(path) = args.get_one::<String>("write") {
        config.save(path)?;
    }
    Ok(())
}
