//! Bearer credentials for the broker and the REST collaborators.
//!
//! A credential is fetched for every connection attempt and every request;
//! nothing here caches a token.

use std::fmt;
use std::future::Future;

use tracing::debug;

use crate::error::AuthError;

/// A short-lived bearer token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn bearer(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

pub trait CredentialSource: Send + Sync + 'static {
    fn fetch(&self) -> impl Future<Output = Result<Credential, AuthError>> + Send;
}

/// Where credentials come from in a configured client.
#[derive(Clone)]
pub enum TokenSource {
    /// A fixed token (development, or a long-lived service token).
    Static(String),
    /// An external program that prints a fresh token on stdout each run.
    Command { program: String, args: Vec<String> },
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::Static(_) => f.write_str("Static(<redacted>)"),
            TokenSource::Command { program, args } => f
                .debug_struct("Command")
                .field("program", program)
                .field("args", args)
                .finish(),
        }
    }
}

impl CredentialSource for TokenSource {
    async fn fetch(&self) -> Result<Credential, AuthError> {
        match self {
            TokenSource::Static(token) if token.trim().is_empty() => Err(AuthError::NotSignedIn),
            TokenSource::Static(token) => Ok(Credential::new(token.trim())),
            TokenSource::Command { program, args } => run_token_command(program, args).await,
        }
    }
}

async fn run_token_command(program: &str, args: &[String]) -> Result<Credential, AuthError> {
    debug!(program, "requesting credential");
    let output = tokio::process::Command::new(program)
        .args(args)
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| AuthError::Source(format!("failed to run {program}: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(AuthError::Refused(format!(
            "{program} exited with {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(AuthError::Refused(format!("{program} printed no token")));
    }
    Ok(Credential::new(token))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_token() {
        let c = Credential::new("secret-token");
        assert_eq!(format!("{c:?}"), "Credential(<redacted>)");
        assert_eq!(c.bearer(), "secret-token");
    }

    #[tokio::test]
    async fn static_token() {
        let c = TokenSource::Static(" abc \n".into()).fetch().await.unwrap();
        assert_eq!(c.bearer(), "abc");
        assert_eq!(
            TokenSource::Static("".into()).fetch().await,
            Err(AuthError::NotSignedIn)
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn command_token_is_trimmed() {
        let source = TokenSource::Command {
            program: "sh".into(),
            args: vec!["-c".into(), "echo fresh-token".into()],
        };
        assert_eq!(source.fetch().await.unwrap().bearer(), "fresh-token");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_command_is_refused() {
        let source = TokenSource::Command {
            program: "sh".into(),
            args: vec!["-c".into(), "echo denied >&2; exit 3".into()],
        };
        match source.fetch().await {
            Err(AuthError::Refused(msg)) => assert!(msg.contains("denied")),
            other => panic!("expected refusal, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_program_is_a_source_error() {
        let source = TokenSource::Command {
            program: "/definitely/not/a/program".into(),
            args: vec![],
        };
        assert!(matches!(source.fetch().await, Err(AuthError::Source(_))));
    }
}
