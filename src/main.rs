//! Gateway entrypoint.
//!
//! Wires the subsystems together: mempool task, executor workers, periodic
//! upkeep, live indexer, reindex workers and the thin HTTP surface, all
//! draining on one cancellation token.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tower_http::cors;
use tower_http::trace::TraceLayer;

use neon_gateway::chain::SolanaAdapter;
use neon_gateway::config::Config;
use neon_gateway::db::{NeonDb, memory::MemNeonDb, postgres::PgNeonDb};
use neon_gateway::executor::periodic::{PeriodicEnv, run_periodic_task};
use neon_gateway::executor::{ExecutorEnv, spawn_workers};
use neon_gateway::indexer::{Indexer, IndexerConfig, StartSlot, plan_range_list, run_reindex_worker};
use neon_gateway::mempool::{Mempool, MempoolHandle, StuckTxDict, run_mempool_task};
use neon_gateway::resources::{OpResourcePool, ResourceInitializer};
use neon_gateway::rpc::{self, AppState};
use neon_gateway::sig_down::SigDown;
use neon_gateway::strategy::{EmulatorClient, EvmConfigData};
use neon_gateway::telemetry::Telemetry;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    let _telemetry = Telemetry::init();
    let config = Config::load();

    let signer_list = match config.operator_signers() {
        Ok(list) => list,
        Err(e) => {
            tracing::error!(error = %e, "operator keys missing or invalid");
            std::process::exit(1);
        }
    };

    let adapter = SolanaAdapter::new(&config.solana_url, config.retry_on_fail);
    let emulator = EmulatorClient::new(config.neon_core_api_url.clone());
    let db: Arc<dyn NeonDb> = match &config.postgres_dsn {
        Some(dsn) => match PgNeonDb::connect(dsn).await {
            Ok(db) => Arc::new(db),
            Err(e) => {
                tracing::error!(error = %e, "database connection failed");
                std::process::exit(1);
            }
        },
        None => {
            tracing::warn!("no POSTGRES_DSN configured, using the in-memory store");
            Arc::new(MemNeonDb::new())
        }
    };

    let sig_down = SigDown::try_new()?;
    let cancel = sig_down.cancellation_token();
    let tracker = TaskTracker::new();

    // EVM-config snapshot: seeded once, refreshed by the periodic task
    let initial_evm_config = emulator
        .get_evm_config()
        .await
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "EVM config unavailable at startup, using defaults");
            EvmConfigData::default()
        });
    let (evm_config_tx, evm_config_rx) = tokio::sync::watch::channel(initial_evm_config);

    // mempool task
    let (mempool_handle, mempool_rx) = MempoolHandle::channel(1024);
    let mempool = Mempool::new(
        config.chain_id,
        config.mempool_capacity,
        config.mempool_capacity_high_watermark,
    );
    tracker.spawn(run_mempool_task(mempool, mempool_rx, cancel.clone()));

    // operator resources
    let resources = Arc::new(OpResourcePool::new(
        &signer_list,
        config.resource_cnt_per_signer,
        &config.evm_loader,
    ));
    let evm_config_now = evm_config_rx.borrow().clone();
    let initializer = Arc::new(ResourceInitializer::new(
        adapter.clone(),
        config.evm_loader,
        config.holder_size,
        config.min_operator_balance,
        config.sender_config(),
        evm_config_now.treasury_pool_cnt,
        evm_config_now.treasury_pool_seed.into_bytes(),
        config.cu_limit,
    ));

    // executor workers + periodic upkeep
    let exec_env = ExecutorEnv {
        adapter: adapter.clone(),
        emulator: emulator.clone(),
        mempool: mempool_handle.clone(),
        resources: resources.clone(),
        stuck_dict: Arc::new(Mutex::new(StuckTxDict::new())),
        alt_queue: Arc::new(Mutex::new(Vec::new())),
        evm_config_rx: evm_config_rx.clone(),
        sender_config: config.sender_config(),
        program_id: config.evm_loader,
        default_chain_id: config.chain_id,
        cu_limit: config.cu_limit,
        cu_priority_fee: config.cu_priority_fee,
    };
    spawn_workers(&tracker, exec_env.clone(), config.executor_cnt, cancel.clone());
    tracker.spawn(run_periodic_task(
        PeriodicEnv {
            exec_env,
            db: db.clone(),
            initializer,
            evm_config_tx,
            eviction_timeout_sec: config.mempool_eviction_timeout_sec,
            gas_price_window_min: config.mempool_gas_price_window,
            alt_freeing_depth: config.alt_freeing_depth,
        },
        cancel.clone(),
    ));

    // live indexer
    let (indexer, overlay_rx) = Indexer::new(
        adapter.clone(),
        db.clone(),
        config.evm_loader,
        IndexerConfig {
            start_slot: config.start_slot,
            holder_timeout: config.holder_timeout,
            batch_block_cnt: config.indexer_batch_block_cnt,
            poll_interval: Duration::from_millis(config.indexer_poll_msec),
            alt_freeing_depth: config.alt_freeing_depth,
            overlay_depth: 64,
        },
    );
    tracker.spawn(indexer.run(cancel.clone()));

    // reindex workers over the historical floor
    if let Ok(reindex_start) = config.reindex_start_slot.parse::<StartSlot>() {
        let reindex_floor = match reindex_start {
            StartSlot::Slot(slot) => Some(slot),
            StartSlot::Continue => db.get_finalized_cursor().await.ok().flatten(),
            StartSlot::Latest => None,
        };
        if let (Some(floor), StartSlot::Slot(start)) = (reindex_floor, config.start_slot) {
            let existing = db.get_reindex_range_list().await.unwrap_or_default();
            let range_list = plan_range_list(
                floor,
                start,
                &existing,
                config.reindex_range_len,
                config.reindex_max_range_cnt,
            );
            tracing::info!(cnt = range_list.len(), "reindex ranges planned");
            // one task per reindex thread, ranges distributed round-robin
            let thread_cnt = config.reindex_thread_cnt.max(1);
            let mut buckets: Vec<Vec<_>> = (0..thread_cnt).map(|_| Vec::new()).collect();
            for (idx, range) in range_list.into_iter().enumerate() {
                buckets[idx % thread_cnt].push(range);
            }
            for bucket in buckets.into_iter().filter(|b| !b.is_empty()) {
                let adapter = adapter.clone();
                let db = db.clone();
                let cancel = cancel.clone();
                let program_id = config.evm_loader;
                tracker.spawn(async move {
                    for range in bucket {
                        run_reindex_worker(
                            adapter.clone(),
                            db.clone(),
                            program_id,
                            range,
                            cancel.clone(),
                        )
                        .await;
                    }
                });
            }
        }
    }

    // HTTP surface
    let app_state = Arc::new(AppState {
        mempool: mempool_handle,
        db,
        emulator,
        overlay_rx,
        chain_id: config.chain_id,
    });
    let http_endpoints = axum::Router::new()
        .merge(rpc::routes().with_state(app_state))
        .layer(TraceLayer::new_for_http())
        .layer(
            cors::CorsLayer::new()
                .allow_origin(cors::Any)
                .allow_methods([axum::http::Method::GET, axum::http::Method::POST])
                .allow_headers(cors::Any),
        );

    let addr = SocketAddr::new(config.host, config.port);
    tracing::info!("starting gateway at http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await.unwrap_or_else(|e| {
        tracing::error!("failed to bind to {addr}: {e}");
        std::process::exit(1);
    });

    let shutdown_token = cancel.clone();
    axum::serve(listener, http_endpoints)
        .with_graceful_shutdown(async move { shutdown_token.cancelled().await })
        .await?;

    cancel.cancel();
    tracker.close();
    tracker.wait().await;
    Ok(())
}
