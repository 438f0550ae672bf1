use super::*;

/// How long connections get to flush and close after cancellation.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Wires the node client, dispatcher, validator, stats, and background
/// loops together and drives the miner accept loop.
pub(crate) struct Server {
    config: Arc<BridgeConfig>,
}

impl Server {
    pub(crate) fn new(config: Arc<BridgeConfig>) -> Self {
        Self { config }
    }

    pub(crate) async fn run(self, cancel: CancellationToken) -> Result {
        let config = self.config;

        let node: Arc<dyn NodeClient> =
            RpcNodeClient::spawn(config.hoosat_address.clone(), cancel.child_token());

        let stats = Arc::new(StatsRegistry::new(config.min_share_diff));
        let validator = Arc::new(ShareValidator::new(node.clone(), config.solo_mining));

        let (template_rx, dispatcher_handle) = Dispatcher::new(
            node.clone(),
            config.block_wait_time(),
            cancel.child_token(),
        )
        .spawn();

        let mut background = Vec::new();
        background.push(dispatcher_handle);

        if config.var_diff && !config.solo_mining {
            info!(
                "vardiff enabled, targeting {} shares/min",
                config.shares_per_min
            );
            background.push(vardiff::start_sweep(
                stats.clone(),
                config.shares_per_min,
                config.var_diff_stats,
                cancel.child_token(),
            ));
        }

        if config.print_stats {
            background.push(stats::start_print_loop(
                stats.clone(),
                validator.clone(),
                cancel.child_token(),
            ));
        }

        if let Some(addr) = config.health_check_listen_addr() {
            info!("enabling health check on {addr}");
            background.push(tokio::spawn(http::serve(
                http::health_router(node.clone()),
                addr,
                cancel.child_token(),
            )));
        }

        if let Some(addr) = config.prom_listen_addr() {
            info!("serving metrics on {addr}");
            background.push(tokio::spawn(http::serve(
                http::metrics_router(stats.clone()),
                addr,
                cancel.child_token(),
            )));
        }

        let listen_addr = config.stratum_listen_addr();
        let listener = TcpListener::bind(&listen_addr)
            .await
            .with_context(|| format!("failed to bind stratum listener on {listen_addr}"))?;

        info!("Listening for miners on {listen_addr}");

        let extranonce_counter = AtomicU32::new(0);
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, socket_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(err) => {
                            warn!("accept failed: {err}");
                            continue;
                        }
                    };

                    if let Err(err) = stream.set_nodelay(true) {
                        warn!("failed to set nodelay on {socket_addr}: {err}");
                    }

                    info!("Accepted connection from {socket_addr}");

                    let extranonce = assign_extranonce(&extranonce_counter, config.extranonce_size);
                    let (reader, writer) = stream.into_split();

                    let connection = Connection::new(
                        config.clone(),
                        node.clone(),
                        validator.clone(),
                        stats.clone(),
                        socket_addr,
                        reader,
                        writer,
                        extranonce,
                        template_rx.clone(),
                        cancel.child_token(),
                    );

                    connections.spawn(async move {
                        if let Err(err) = connection.serve().await {
                            error!("miner connection {socket_addr} error: {err}");
                        }
                    });
                }

                Some(_) = connections.join_next(), if !connections.is_empty() => {}

                _ = cancel.cancelled() => {
                    info!("Shutting down stratum server");
                    break;
                }
            }
        }

        // Connections observe the cancellation token themselves; give them
        // a bounded window to flush and close.
        if timeout(SHUTDOWN_GRACE, async {
            while connections.join_next().await.is_some() {}
        })
        .await
        .is_err()
        {
            warn!("shutdown grace expired, aborting remaining connections");
            connections.abort_all();
        }

        for handle in background {
            handle.abort();
        }

        info!("shutdown complete");
        Ok(())
    }
}

/// Hand out the next extranonce for a fresh connection, if configured.
fn assign_extranonce(counter: &AtomicU32, size: u8) -> Option<Extranonce> {
    if size == 0 {
        return None;
    }

    let space = 1u32 << (8 * size as u32);
    let next = counter.fetch_add(1, Ordering::Relaxed);

    if next != 0 && next % space == 0 {
        warn!("extranonce space wrapped; new clients may duplicate work");
    }

    Some(Extranonce::from_counter(next % space, size as usize))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_extranonce_when_disabled() {
        let counter = AtomicU32::new(0);
        assert_eq!(assign_extranonce(&counter, 0), None);
    }

    #[test]
    fn extranonces_are_sequential_and_sized() {
        let counter = AtomicU32::new(0);

        let first = assign_extranonce(&counter, 2).unwrap();
        let second = assign_extranonce(&counter, 2).unwrap();

        assert_eq!(first.to_hex(), "0000");
        assert_eq!(second.to_hex(), "0001");
        assert_eq!(first.len(), 2);
    }

    #[test]
    fn extranonce_wraps_within_its_space() {
        let counter = AtomicU32::new(255);
        let wrapped = assign_extranonce(&counter, 1).unwrap();
        assert_eq!(wrapped.to_hex(), "ff");

        let next = assign_extranonce(&counter, 1).unwrap();
        assert_eq!(next.to_hex(), "00");
    }
}
