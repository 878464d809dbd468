use clap::Parser;
use seva_relay::config::{
    API_KEY_ENV, DEFAULT_MODEL, DEFAULT_UPSTREAM_BASE_URL, RelayConfig,
};
use seva_relay::logging::{self, LoggingConfig};
use seva_relay::relay::DEFAULT_SYSTEM_PROMPT;
use seva_relay::server;
use tracing::{Level, info};

#[derive(Parser, Debug)]
#[command(name = "seva-relay")]
#[command(about = "Seva chat relay - streams chat completions from an OpenAI-compatible provider")]
struct CliArgs {
    /// Host address to bind the relay server
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port number to bind the relay server
    #[arg(long, default_value_t = 8000)]
    port: u16,

    /// Base URL of the OpenAI-compatible upstream API
    #[arg(long, default_value = DEFAULT_UPSTREAM_BASE_URL)]
    upstream_base_url: String,

    /// Upstream API key
    #[arg(long, env = API_KEY_ENV, hide_env_values = true)]
    api_key: Option<String>,

    /// Model identifier sent with every upstream request
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    /// System prompt prepended to every conversation
    #[arg(long, default_value = DEFAULT_SYSTEM_PROMPT)]
    system_prompt: String,

    /// Total timeout in seconds for one upstream call, streaming included
    #[arg(long, default_value_t = 600)]
    request_timeout_secs: u64,

    /// Timeout in seconds for establishing the upstream connection
    #[arg(long, default_value_t = 10)]
    connect_timeout_secs: u64,

    /// Maximum request body size in bytes
    #[arg(long, default_value_t = 1048576)] // 1MB
    max_payload_size: usize,

    /// Text appended to the reply when the upstream stream breaks mid-response
    #[arg(long)]
    stream_error_marker: Option<String>,

    /// Log level
    #[arg(long, default_value = "info", value_parser = ["trace", "debug", "info", "warn", "error"])]
    log_level: String,

    /// Directory for daily rotated log files
    #[arg(long)]
    log_dir: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false)]
    log_json: bool,
}

impl CliArgs {
    fn into_relay_config(self) -> RelayConfig {
        let log_level = match self.log_level.as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };

        RelayConfig {
            host: self.host,
            port: self.port,
            upstream_base_url: self.upstream_base_url,
            api_key: self.api_key.unwrap_or_default(),
            model: self.model,
            system_prompt: self.system_prompt,
            request_timeout_secs: self.request_timeout_secs,
            connect_timeout_secs: self.connect_timeout_secs,
            max_payload_size: self.max_payload_size,
            stream_error_marker: self.stream_error_marker,
            log_level,
            log_dir: self.log_dir,
            log_json: self.log_json,
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine; the key may come from the environment.
    let _ = dotenvy::dotenv();

    let config = CliArgs::parse().into_relay_config();
    config.validate()?;

    let _log_guard = logging::init_logging(LoggingConfig::from(&config));
    info!("Starting seva-relay with {:?}", config);

    server::startup(config).await
}
