use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancels `token` on SIGINT or SIGTERM.
#[derive(Debug, Clone)]
pub struct SignalHandler {
    token: CancellationToken,
}

impl SignalHandler {
    pub fn install(token: CancellationToken) -> Self {
        let handler = Self { token };
        let token = handler.token.clone();

        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                received = wait_for_signal() => {
                    if let Some(name) = received {
                        info!("Received {}, initiating graceful shutdown", name);
                    }
                    token.cancel();
                }
            }
        });

        handler
    }

    pub fn is_triggered(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}

/// Resolves with the signal name; `None` if no handler could be installed.
async fn wait_for_signal() -> Option<&'static str> {
    #[cfg(unix)]
    {
        let mut sigterm = match unix_signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!("Failed to create SIGTERM handler: {}", err);
                return ctrl_c().await;
            }
        };

        tokio::select! {
            received = ctrl_c() => received,
            _ = sigterm.recv() => Some("SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c().await
    }
}

async fn ctrl_c() -> Option<&'static str> {
    match signal::ctrl_c().await {
        Ok(()) => Some("SIGINT (Ctrl+C)"),
        Err(err) => {
            error!("Failed to listen for SIGINT: {}", err);
            std::future::pending::<()>().await;
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_external_cancel_releases_waiters() {
        let token = CancellationToken::new();
        let handler = SignalHandler::install(token.clone());
        assert!(!handler.is_triggered());

        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handler.wait())
            .await
            .unwrap();
        assert!(handler.is_triggered());
    }
}
