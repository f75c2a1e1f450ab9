use dotenvy::dotenv;
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use totp_bot_core::config::CoreSettings;
use totp_bot_transport_telegram::config::{BotSettings, TelegramSettings};
use totp_bot_transport_telegram::runner::run_bot;
use tracing::{error, info};
use tracing_subscriber::{prelude::*, EnvFilter};

const DEFAULT_LOG_FILTER: &str = "totp_bot_core=info,totp_bot_transport_telegram=info,totp_bot_telegram=info,sqlx=warn,hyper=warn,reqwest=warn,tokio=warn";

/// Patterns that must never reach the log output
struct RedactionPatterns {
    token_in_url: Regex,
    bare_token: Regex,
    token_env: Regex,
}

impl RedactionPatterns {
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_in_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)")?,
            bare_token: Regex::new(r"\b[0-9]{8,10}:[A-Za-z0-9_-]{35}\b")?,
            token_env: Regex::new(r"(TELEGRAM_TOKEN=)[^\s&]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self
            .token_in_url
            .replace_all(input, "$1[TELEGRAM_TOKEN]");
        let output = self.bare_token.replace_all(&output, "[TELEGRAM_TOKEN]");
        self.token_env
            .replace_all(&output, "$1[MASKED]")
            .into_owned()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let s = String::from_utf8_lossy(buf);
        self.inner
            .write_all(self.patterns.redact(&s).as_bytes())?;
        // Report the caller's length; the redacted text may be shorter or longer
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: self.patterns.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    // Compile before logging starts so nothing is written unredacted
    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);

    init_logging(patterns);

    info!("Starting TOTP bot...");

    let settings = init_settings();

    run_bot(settings).await;

    Ok(())
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
        patterns,
    };

    let debug_mode = std::env::var("DEBUG_MODE")
        .map(|v| v == "true" || v == "1")
        .unwrap_or(false);

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if debug_mode { "debug" } else { DEFAULT_LOG_FILTER })
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Arc<BotSettings> {
    let core_settings = match CoreSettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load core configuration: {}", e);
            std::process::exit(1);
        }
    };
    let telegram_settings = match TelegramSettings::new() {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load telegram configuration: {}", e);
            std::process::exit(1);
        }
    };
    if telegram_settings.telegram_token.is_empty() {
        error!("TELEGRAM_TOKEN is not set");
        std::process::exit(1);
    }

    info!(
        database = %core_settings.database_file_location,
        "Configuration loaded successfully."
    );
    Arc::new(BotSettings::new(core_settings, telegram_settings))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOKEN: &str = "123456789:AAHdqTcvCH1vGWJxfSeofSAs0K5PALDsaw1";

    #[test]
    fn test_redacts_token_in_api_url() -> Result<(), regex::Error> {
        let patterns = RedactionPatterns::new()?;
        let line = format!("error sending request for url (https://api.telegram.org/bot{TOKEN}/getMe)");
        let redacted = patterns.redact(&line);
        assert!(!redacted.contains(TOKEN));
        assert!(redacted.contains("https://api.telegram.org/bot[TELEGRAM_TOKEN]/getMe"));
        Ok(())
    }

    #[test]
    fn test_redacts_bare_and_env_tokens() -> Result<(), regex::Error> {
        let patterns = RedactionPatterns::new()?;
        assert_eq!(patterns.redact(TOKEN), "[TELEGRAM_TOKEN]");
        assert_eq!(
            patterns.redact("TELEGRAM_TOKEN=abc other"),
            "TELEGRAM_TOKEN=[MASKED] other"
        );
        assert_eq!(patterns.redact("nothing here"), "nothing here");
        Ok(())
    }
}
