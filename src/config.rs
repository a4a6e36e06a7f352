//! Server and bot settings from the command line or the environment.

use std::{
    net::{Ipv4Addr, SocketAddr},
    path::PathBuf,
    time::Duration,
};

use clap::Parser;

use crate::parsing::DEFAULT_OCR_COMMAND;

/// The REST API server and Telegram bot for the family ledger.
///
/// Every option can also be set with the environment variable named in its
/// help text, including through a `.env` file in the working directory.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// File path to the application SQLite database.
    #[arg(long, env = "DATABASE_PATH", default_value = "ledger.db")]
    pub db_path: PathBuf,

    /// The port to serve the API from.
    #[arg(short, long, env = "PORT", default_value_t = 8000)]
    pub port: u16,

    /// The directory receipt images are saved to and served from.
    #[arg(long, env = "UPLOAD_DIR", default_value = "uploads")]
    pub upload_dir: PathBuf,

    /// The canonical timezone for receipt dates and exported timestamps.
    #[arg(long, env = "LOCAL_TIMEZONE", default_value = "Asia/Shanghai")]
    pub local_timezone: String,

    /// API key for the chat completion API. Messages are parsed with keyword
    /// heuristics only when this is not set.
    #[arg(long, env = "DEEPSEEK_API_KEY", hide_env_values = true)]
    pub llm_api_key: Option<String>,

    /// Base URL of the OpenAI-compatible chat completion API.
    #[arg(long, env = "LLM_BASE_URL", default_value = "https://api.deepseek.com")]
    pub llm_base_url: String,

    /// The chat model to use.
    #[arg(long, env = "LLM_MODEL", default_value = "deepseek-chat")]
    pub llm_model: String,

    /// How long to wait for the chat completion API, in seconds.
    #[arg(long, env = "LLM_TIMEOUT_SECS", default_value_t = 60)]
    pub llm_timeout_secs: u64,

    /// Telegram bot token. The bot is not started when this is not set.
    #[arg(long, env = "TELEGRAM_BOT_TOKEN", hide_env_values = true)]
    pub telegram_bot_token: Option<String>,

    /// The OCR command line, `{image}` is replaced with the image path.
    #[arg(long, env = "OCR_COMMAND", default_value = DEFAULT_OCR_COMMAND)]
    pub ocr_command: String,

    /// How long to wait for the OCR command, in seconds.
    #[arg(long, env = "OCR_TIMEOUT_SECS", default_value_t = 20)]
    pub ocr_timeout_secs: u64,

    /// File path for the debug log.
    #[arg(long, env = "LOG_PATH", default_value = "debug.log")]
    pub log_path: PathBuf,
}

impl Config {
    /// The address the server listens on, all interfaces at [Config::port].
    pub fn bind_address(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    /// The LLM API key, treating an empty value as unset.
    pub fn llm_api_key(&self) -> Option<&str> {
        non_empty(self.llm_api_key.as_deref())
    }

    /// The bot token, treating an empty value as unset.
    pub fn telegram_bot_token(&self) -> Option<&str> {
        non_empty(self.telegram_bot_token.as_deref())
    }

    /// The LLM request timeout.
    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    /// The OCR command timeout.
    pub fn ocr_timeout(&self) -> Duration {
        Duration::from_secs(self.ocr_timeout_secs)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, time::Duration};

    use clap::Parser;

    use super::Config;

    #[test]
    fn parses_flags() {
        let config = Config::try_parse_from([
            "server",
            "--db-path",
            "family.db",
            "--port",
            "9000",
            "--llm-api-key",
            "sk-test",
            "--ocr-timeout-secs",
            "5",
        ])
        .unwrap();

        assert_eq!(config.db_path, PathBuf::from("family.db"));
        assert_eq!(config.bind_address().port(), 9000);
        assert_eq!(config.llm_api_key(), Some("sk-test"));
        assert_eq!(config.ocr_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn blank_secrets_count_as_unset() {
        let config = Config::try_parse_from([
            "server",
            "--llm-api-key",
            " ",
            "--telegram-bot-token",
            "",
        ])
        .unwrap();

        assert_eq!(config.llm_api_key(), None);
        assert_eq!(config.telegram_bot_token(), None);
    }

    #[test]
    fn rejects_invalid_port() {
        assert!(Config::try_parse_from(["server", "--port", "not-a-port"]).is_err());
    }
}
