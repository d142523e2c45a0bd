use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::error::PesticideError;

/// Directive used when `RUST_LOG` is unset.
pub const DEFAULT_DIRECTIVE: &str = "pesticide_explorer=info";

/// Install a global subscriber writing formatted events to stderr.
///
/// `RUST_LOG` overrides `default_directive`. Calling this a second time is an
/// error because a global subscriber can only be set once per process.
pub fn init_logging(default_directive: &str) -> Result<(), PesticideError> {
    let from_env = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let filter = build_filter(from_env.as_deref(), default_directive)?;

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init()
        .map_err(|e| PesticideError::Config(format!("logging already initialised: {e}")))
}

/// A valid `env_directive` wins; otherwise `default_directive` must parse.
fn build_filter(
    env_directive: Option<&str>,
    default_directive: &str,
) -> Result<EnvFilter, PesticideError> {
    if let Some(filter) = env_directive.and_then(|d| EnvFilter::try_new(d).ok()) {
        return Ok(filter);
    }
    EnvFilter::try_new(default_directive)
        .map_err(|e| PesticideError::Config(format!("invalid log directive: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bad_default_directive_is_a_config_error() {
        assert!(matches!(
            build_filter(None, "pesticide_explorer=loud"),
            Err(PesticideError::Config(_))
        ));
        assert!(build_filter(None, DEFAULT_DIRECTIVE).is_ok());
    }

    #[test]
    fn env_directive_takes_precedence() {
        assert!(build_filter(Some("debug"), "pesticide_explorer=loud").is_ok());
        // unparsable env value falls back to the default
        assert!(build_filter(Some("pesticide_explorer=loud"), DEFAULT_DIRECTIVE).is_ok());
    }

    #[test]
    fn second_initialisation_fails() {
        let _ = init_logging(DEFAULT_DIRECTIVE);
        assert!(matches!(
            init_logging(DEFAULT_DIRECTIVE),
            Err(PesticideError::Config(_))
        ));
    }
}
