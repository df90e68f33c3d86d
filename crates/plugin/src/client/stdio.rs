//! stdio helpers for launching provider processes.

use std::process::Stdio;
use std::sync::Arc;

use inquest_engine::ProviderCallback;
use inquest_util::redact_sensitive;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tracing::info;

use super::{ClientOptions, ProviderClient};
use crate::config::ProviderSettings;
use crate::error::PluginError;

/// Build a configured `tokio::process::Command` for a provider.
pub(crate) fn build_command(settings: &ProviderSettings) -> Result<Command, PluginError> {
    if settings.command.trim().is_empty() {
        return Err(PluginError::configuration("missing command for provider"));
    }

    let mut command = Command::new(&settings.command);
    command
        .args(&settings.args)
        .envs(&settings.env)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(cwd) = &settings.cwd {
        command.current_dir(cwd);
    }
    Ok(command)
}

/// Spawn a background task that forwards stderr lines to tracing.
pub(crate) fn spawn_stderr_logger(provider: String, stderr: ChildStderr) {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            info!(provider = %provider, "{}", redact_sensitive(&line));
        }
    });
}

impl ProviderClient {
    /// Launch the provider described by `settings` and complete the handshake.
    pub async fn spawn(
        name: impl Into<String>,
        settings: &ProviderSettings,
        callback: Option<Arc<dyn ProviderCallback>>,
    ) -> Result<Self, PluginError> {
        let name = name.into();
        let mut child = build_command(settings)?
            .spawn()
            .map_err(|error| PluginError::connection(anyhow::Error::new(error).context(format!("failed to launch provider '{name}'"))))?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(PluginError::configuration(format!("provider '{name}' has no stdio pipes")));
        };
        if let Some(stderr) = child.stderr.take() {
            spawn_stderr_logger(name.clone(), stderr);
        }

        let options = ClientOptions {
            startup_timeout: settings.timeout(),
            request_timeout: settings.timeout(),
        };
        let client = ProviderClient::connect_io(name, stdout, stdin, options, callback).await?;
        client.attach_child(child);
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_carry_settings() {
        let mut settings = ProviderSettings::new("inquest-os");
        settings.args = vec!["serve".into()];
        settings.env.insert("INQUEST_LOG".into(), "debug".into());
        settings.cwd = Some("/tmp".into());

        let command = build_command(&settings).expect("command");
        let command = command.as_std();
        assert_eq!(command.get_program(), "inquest-os");
        assert_eq!(command.get_args().collect::<Vec<_>>(), vec!["serve"]);
        assert!(
            command
                .get_envs()
                .any(|(key, value)| key == "INQUEST_LOG" && value.is_some_and(|value| value == "debug"))
        );
        assert_eq!(command.get_current_dir().and_then(|dir| dir.to_str()), Some("/tmp"));
    }

    #[test]
    fn empty_commands_are_rejected() {
        assert!(matches!(
            build_command(&ProviderSettings::default()),
            Err(PluginError::Configuration { .. })
        ));
    }
}
