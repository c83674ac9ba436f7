//! Command-line interface for chat-relay

use clap::{Parser, Subcommand};

/// Streaming chat proxy for browser chat UIs
#[derive(Parser)]
#[command(name = "chat-relay")]
#[command(version)]
#[command(about = "Streaming chat proxy for browser chat UIs")]
#[command(
    long_about = "chat-relay budgets conversation history to a token limit, forwards it to an \
    OpenAI-compatible or simple completion backend, and relays the reply as Server-Sent Events."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# chat-relay configuration
#
# Every value under [backend] except `kind` can also be set through the
# environment: CHAT_RELAY_BASE_URL, CHAT_RELAY_API_KEY, CHAT_RELAY_MODEL.
# CHAT_RELAY_TOKEN_LIMIT overrides budget.token_limit.

[server]
# Address to bind (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"
port = 3000

# Seconds allowed for connecting to the backend (1-300)
connect_timeout_seconds = 10

[backend]
# "openai" for OpenAI-compatible chat completions (api_key required)
# "simple" for a backend exposing POST {base_url}/chat with {messages, model, stream}
kind = "openai"
base_url = "https://api.openai.com/v1"

# api_key = "sk-..."

# When set, /api/models returns only this model and never calls the backend
# model = "gpt-4o-mini"

[budget]
# Context window of the target model, in tokens
token_limit = 4096

# Tokens kept free for the reply; history is trimmed to token_limit minus this
reserved_response_tokens = 512

# Which messages go first when history is too long:
#   "middle" removes from the middle, keeping the opening and the latest turns
#   "front"  removes the oldest messages after the system prompt
policy = "middle"

# "cl100k" for real BPE counts, "heuristic" for a four-characters-per-token estimate
tokenizer = "cl100k"

[upload]
# Largest file accepted by /api/upload, in bytes
max_bytes = 10485760

# Accepted MIME types; an empty list accepts anything
allowed_content_types = ["application/pdf", "text/plain", "text/markdown"]

[store]
# Saved conversations kept in memory by /api/chats; new ids are refused past this
max_conversations = 1000

[observability]
# Log level: "trace", "debug", "info", "warn", "error"
log_level = "info"

# Prometheus metrics are served at /metrics on the server port
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn default_config_path() {
        let cli = Cli::parse_from(["chat-relay"]);
        assert_eq!(cli.config, "config.toml");
        assert!(cli.command.is_none());
    }

    #[test]
    fn custom_config_path() {
        let cli = Cli::parse_from(["chat-relay", "--config", "relay.toml"]);
        assert_eq!(cli.config, "relay.toml");
    }

    #[test]
    fn config_subcommand_with_output() {
        let cli = Cli::parse_from(["chat-relay", "config", "-o", "my-config.toml"]);
        assert!(matches!(
            cli.command,
            Some(Command::Config { output: Some(ref path) }) if path == "my-config.toml"
        ));
    }

    #[test]
    fn template_parses_as_config() {
        use std::str::FromStr;
        let config = crate::config::Config::from_str(generate_config_template())
            .expect("template should be a valid config");
        assert_eq!(config.backend.kind(), crate::backend::BackendKind::OpenAi);
        assert_eq!(config.budget.token_limit, 4096);
    }

    #[test]
    fn template_has_all_sections() {
        let template = generate_config_template();
        for section in [
            "[server]",
            "[backend]",
            "[budget]",
            "[upload]",
            "[store]",
            "[observability]",
        ] {
            assert!(template.contains(section), "missing {}", section);
        }
    }
}
