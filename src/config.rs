//! Config handling

use tracing::log::LevelFilter;
use url::Url;

use crate::cli::CliOptions;
use crate::constants::{DEFAULT_MAX_STREAM_BYTES, REPLICATE_API_BASE, WEBHOOK_PATH};
use crate::error::{ConfigError, GenerationError};
use crate::job::JobMode;

/// Sets up logging based on the debug flag
pub fn setup_logging(debug: bool) -> Result<(), Box<std::io::Error>> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let mut logger = simple_logger::SimpleLogger::new().with_level(level);
    if !debug {
        logger = logger
            .with_module_level("tracing", LevelFilter::Warn)
            .with_module_level("rustls", LevelFilter::Info)
            .with_module_level("hyper_util", LevelFilter::Info)
            .with_module_level("reqwest", LevelFilter::Info)
            .with_module_level("tower_sessions", LevelFilter::Warn)
            .with_module_level("h2", LevelFilter::Info);
    }
    logger.init().map_err(|err| {
        eprintln!("Failed to initialize logger: {}", err);
        Box::new(std::io::Error::other(err))
    })
}

/// Everything the submitter and tracker need, built once at startup.
#[derive(Clone)]
pub struct GeneratorConfig {
    api_token: String,
    /// Block on the provider or hand back job ids
    pub mode: JobMode,
    /// Overrides the host-derived webhook base
    pub callback_base: Option<Url>,
    /// Byte budget for streamed outputs
    pub max_stream_bytes: usize,
    /// Ask the provider for lazy byte streams instead of URLs
    pub file_output: bool,
    /// Provider API base
    pub provider_base: Url,
}

impl std::fmt::Debug for GeneratorConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratorConfig")
            .field("api_token", &"<redacted>")
            .field("mode", &self.mode)
            .field("callback_base", &self.callback_base)
            .field("max_stream_bytes", &self.max_stream_bytes)
            .field("file_output", &self.file_output)
            .field("provider_base", &self.provider_base)
            .finish()
    }
}

impl GeneratorConfig {
    /// Defaults for everything except the credential and mode.
    pub fn new(api_token: impl Into<String>, mode: JobMode) -> Self {
        Self {
            api_token: api_token.into(),
            mode,
            callback_base: None,
            max_stream_bytes: DEFAULT_MAX_STREAM_BYTES,
            file_output: false,
            provider_base: default_provider_base(),
        }
    }

    /// Builds the config from parsed options, refusing to start without a credential.
    pub fn from_cli(cli: &CliOptions) -> Result<Self, ConfigError> {
        let api_token = cli.replicate_api_token.trim();
        if api_token.is_empty() {
            return Err(ConfigError::MissingCredential);
        }
        let callback_base = cli
            .callback_base_url
            .as_deref()
            .filter(|base| !base.trim().is_empty())
            .map(Url::parse)
            .transpose()?;

        Ok(Self::new(api_token, cli.mode)
            .with_callback_base(callback_base)
            .with_max_stream_bytes(cli.max_stream_bytes)
            .with_file_output(cli.file_output))
    }

    /// The provider credential.
    pub fn api_token(&self) -> &str {
        &self.api_token
    }

    /// Sets the webhook base override.
    pub fn with_callback_base(mut self, callback_base: Option<Url>) -> Self {
        self.callback_base = callback_base;
        self
    }

    /// Sets the byte budget for streamed outputs.
    pub fn with_max_stream_bytes(mut self, max_stream_bytes: usize) -> Self {
        self.max_stream_bytes = max_stream_bytes;
        self
    }

    /// Turns provider file output on or off.
    pub fn with_file_output(mut self, file_output: bool) -> Self {
        self.file_output = file_output;
        self
    }

    /// Points the provider client at another API base.
    pub fn with_provider_base(mut self, provider_base: Url) -> Self {
        self.provider_base = provider_base;
        self
    }

    /// Where the provider should post completion callbacks. Uses the configured base, or
    /// `https://` plus the request host. `None` when neither is known.
    ///
    /// A path on the configured base is kept, the webhook route is resolved under it.
    pub fn callback_url(&self, request_host: Option<&str>) -> Result<Option<Url>, GenerationError> {
        let mut base = match (&self.callback_base, request_host) {
            (Some(base), _) => base.clone(),
            (None, Some(host)) => Url::parse(&format!("https://{host}"))?,
            (None, None) => return Ok(None),
        };
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Some(base.join(WEBHOOK_PATH.trim_start_matches('/'))?))
    }
}

#[allow(clippy::expect_used)]
fn default_provider_base() -> Url {
    Url::parse(REPLICATE_API_BASE).expect("provider base URL constant")
}
