// Copyright 2025 ShieldVault contributors
// Licensed under the Apache License, Version 2.0

//! ShieldVault service
//!
//! Serves the HTTP API and runs the background workers: the session
//! sweeper, the manual transfer poller, the optional job queue and the
//! optional yield sync. Both trigger paths run transfers through the
//! execution grants, so they keep firing after sessions end.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{error, info, warn};
use shieldvault_config::VaultConfig;
use shieldvault_keypair::{LocalWallet, WalletSigner};
use solana_sdk::pubkey::Pubkey;
use tokio::net::TcpListener;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use shieldvault_core::api::{ApiState, create_router};
use shieldvault_core::clock::{SharedClock, SystemClock};
use shieldvault_core::ledger::{InMemoryLedger, LedgerRules, ProgramAddresses};
use shieldvault_core::pool::{CachedFeed, HttpYieldFeed, PoolClient};
use shieldvault_core::transfers::{
    LocalJobQueue, RocksCacheStore, TransferCache, spawn_job_queue, spawn_poller,
};
use shieldvault_core::{Automation, SessionManager, VaultClientFactory};

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let config = VaultConfig::load().context("loading configuration")?;
    let _ = VaultConfig::set_global(config.clone());
    let config = shieldvault_config::global_config();

    if !config.features.dev_mode {
        bail!("no remote ledger adapter is configured; set DEV_MODE=1 to serve an in-process ledger");
    }

    info!("============================================");
    info!("        SHIELDVAULT v{}", env!("CARGO_PKG_VERSION"));
    info!("============================================");
    info!("Bind address      : {}", config.api.bind_addr());
    info!("Program id        : {}", config.pool.program_id);
    info!("Pool id           : {}", config.pool.pool_id);
    info!("Session TTL       : {}s", config.session.ttl_secs);
    info!("Grant TTL         : {}s", config.transfers.grant_ttl_secs);
    info!("Poll interval     : {}s", config.transfers.poll_interval_secs);
    info!("Automation        : {}", config.transfers.automation_enabled);
    info!("============================================");

    let clock: SharedClock = Arc::new(SystemClock);
    let program_id: Pubkey = config
        .pool
        .program_id
        .parse()
        .context("invalid program id")?;
    let ledger = Arc::new(InMemoryLedger::new(
        ProgramAddresses::new(program_id),
        LedgerRules::from_config(config),
        clock.clone(),
    ));
    let pool = Arc::new(PoolClient::from_config(ledger, config, clock.clone())?);

    let authority = Arc::new(LocalWallet::new_random());
    pool.initialize_pool(authority.as_ref()).await?;
    info!(
        "Dev pool {} initialized, authority {}",
        pool.pool_address(),
        authority.address()
    );

    let cache = match &config.cache.path {
        Some(path) => TransferCache::new(Arc::new(
            RocksCacheStore::open(path).with_context(|| format!("opening cache at {path}"))?,
        )),
        None => TransferCache::in_memory(),
    };
    let mut factory = VaultClientFactory::new(pool.clone())
        .with_grant_ttl(config.transfers.grant_ttl_secs)
        .with_cache(Arc::new(cache));
    let queue = config
        .transfers
        .automation_enabled
        .then(|| Arc::new(LocalJobQueue::new(clock.clone())));
    if let Some(queue) = &queue {
        factory = factory.with_automation(Automation {
            scheduler: queue.clone(),
            funding_lamports: config.transfers.job_funding_lamports,
        });
    }

    let grants = factory.grants().clone();
    let sessions = Arc::new(SessionManager::new(
        factory,
        config.session.ttl_secs,
        clock.clone(),
    ));

    let token = CancellationToken::new();
    let poll_every = Duration::from_secs(config.transfers.poll_interval_secs.max(1));
    let mut workers = vec![
        sessions.clone().spawn_sweeper(
            Duration::from_secs(config.session.sweep_interval_secs.max(1)),
            token.clone(),
        ),
        spawn_poller(grants.clone(), poll_every, token.clone()),
    ];
    if let Some(queue) = queue {
        workers.push(spawn_job_queue(queue, grants, poll_every, token.clone()));
    }

    if let Some(url) = &config.pool.yield_feed_url {
        let feed = CachedFeed::new(
            HttpYieldFeed::new(url.clone(), Duration::from_secs(10))?,
            clock.clone(),
            config.pool.max_feed_staleness_secs,
        );
        let pool = pool.clone();
        let authority = authority.clone();
        let token = token.clone();
        info!("Yield sync from {url}");
        workers.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_every);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match pool.sync_yield(authority.as_ref(), &feed).await {
                            Ok(Some(_)) => info!("pool value synced from feed"),
                            Ok(None) => {}
                            Err(e) => match feed.read().await {
                                Ok(reading) => warn!(
                                    "yield sync failed: {e}; last quote {} bps, stale={}",
                                    reading.quote.apy_bps, reading.stale
                                ),
                                Err(_) => warn!("yield sync failed: {e}"),
                            },
                        }
                    }
                }
            }
        }));
    }

    let router = create_router(ApiState {
        sessions,
        pool,
        start_time: std::time::Instant::now(),
    });
    let listener = TcpListener::bind(config.api.bind_addr()).await?;
    info!("HTTP API listening on {}", config.api.bind_addr());

    let shutdown = token.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            if let Err(e) = signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            shutdown.cancel();
        })
        .await?;

    token.cancel();
    for worker in workers {
        if let Err(e) = worker.await {
            error!("Worker ended abnormally: {}", e);
        }
    }
    info!("ShieldVault stopped");
    Ok(())
}
