use anyhow::Context;
use sqlx::mysql::MySqlPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use task_payment_engine::api::{self, AppState};
use task_payment_engine::application::PaymentEngine;
use task_payment_engine::infrastructure::adapters::redis_lock::init_redis_pool;
use task_payment_engine::infrastructure::adapters::{
    InMemoryDistributedLock, MySqlPaymentEventSink, MySqlPaymentStore, RedisDistributedLock,
    ShouqianbaAdapter,
};
use task_payment_engine::infrastructure::config::{EngineConfig, GatewayConfig};
use task_payment_engine::ports::DistributedLockPort;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// 过期交易清理周期与单次上限
const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const EXPIRY_SWEEP_LIMIT: u32 = 100;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 加载环境变量
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    info!("Starting task payment engine...");

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = MySqlPoolOptions::new()
        .max_connections(20)
        .connect(&database_url)
        .await
        .context("failed to connect to database")?;
    let pool = Arc::new(pool);
    info!("Database connected successfully");

    let gateway_config = GatewayConfig::from_env()?;
    let engine_config = EngineConfig::from_env()?;
    info!(
        merchant_no = %gateway_config.merchant_no,
        sandbox = gateway_config.sandbox,
        "Gateway configuration loaded"
    );

    match std::env::var("REDIS_URL") {
        Ok(redis_url) => {
            let redis = init_redis_pool(&redis_url, 16).await?;
            info!("Using Redis distributed lock");
            run(
                Arc::new(RedisDistributedLock::new(redis)),
                pool,
                gateway_config,
                engine_config,
            )
            .await
        }
        Err(_) => {
            warn!("REDIS_URL not set, using in-process lock (single instance only)");
            run(
                Arc::new(InMemoryDistributedLock::new()),
                pool,
                gateway_config,
                engine_config,
            )
            .await
        }
    }
}

async fn run<L>(
    lock: Arc<L>,
    pool: Arc<sqlx::MySqlPool>,
    gateway_config: Arc<GatewayConfig>,
    engine_config: EngineConfig,
) -> anyhow::Result<()>
where
    L: DistributedLockPort + 'static,
{
    let gateway = Arc::new(ShouqianbaAdapter::new(gateway_config.clone())?);
    let store = Arc::new(MySqlPaymentStore::new(pool.clone()));
    let sink = Arc::new(MySqlPaymentEventSink::new(pool));

    let engine = Arc::new(PaymentEngine::new(
        gateway,
        store,
        lock,
        sink,
        gateway_config,
        engine_config,
    ));

    let sweeper = {
        let engine = engine.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                if let Err(e) = engine.close_expired_trades(EXPIRY_SWEEP_LIMIT).await {
                    warn!("Expired trade sweep failed: {}", e);
                }
            }
        })
    };

    let app = api::create_router(AppState {
        engine: engine.clone(),
    });

    let host = std::env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
    let port = std::env::var("SERVER_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("{}:{}", host, port);

    info!("Server listening on {}", addr);
    info!("Available endpoints:");
    info!("  GET  /health - Health check");
    info!("  POST /api/v1/pay/prepay - Create prepay order");
    info!("  GET  /api/v1/pay/status/:order_no - Query trade status");
    info!("  POST /api/v1/pay/callback - Payment callback");
    info!("  POST /api/v1/pay/refund_callback - Refund callback");
    info!("  POST /api/v1/pay/transfer_callback - Transfer callback");
    info!("  POST /api/v1/pay/refunds - Refund order");
    info!("  POST /api/v1/tasks/:task_id/settlement - Settle task");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to listen for shutdown signal: {}", e);
            }
        })
        .await?;

    sweeper.abort();
    engine.shutdown().await;
    info!("Payment engine stopped");
    Ok(())
}
