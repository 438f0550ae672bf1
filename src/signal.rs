use {super::*, tokio::signal::ctrl_c};

pub(crate) fn setup_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c() => info!("Received shutdown signal (ctrl-c)"),
                _ = sigterm.recv() => info!("Received shutdown signal (SIGTERM)"),
            }
        }

        #[cfg(not(unix))]
        if ctrl_c().await.is_ok() {
            info!("Received shutdown signal (ctrl-c)");
        }

        token_clone.cancel();
    });

    token
}
