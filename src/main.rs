use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use sqlx::mysql::MySqlPoolOptions;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use zentao_sso::store::file::{FileBindingStore, FileTicketStore};
use zentao_sso::store::sqlite::SqliteStore;
use zentao_sso::zentao::ZenTaoMysql;
use zentao_sso::{
    AccountResolver, AppConfig, BindingStore, DingTalkClient, GatewayState, SessionRelay,
    StoreBackend, TargetSystem, TicketStore, ZenTaoApi, ZenTaoBackend, gateway_routes,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env().context("failed to load configuration")?;
    tracing::info!(
        listen = %config.listen,
        zentao = %config.signer.base(),
        base_path = config.gateway.base_path(),
        "loaded configuration"
    );

    let target: Arc<dyn TargetSystem> = match &config.zentao {
        ZenTaoBackend::Mysql {
            database_url,
            table_prefix,
        } => {
            let pool = MySqlPoolOptions::new()
                .max_connections(5)
                .connect(database_url)
                .await
                .context("failed to connect to the ZenTao database")?;
            Arc::new(ZenTaoMysql::new(pool, table_prefix.as_str(), config.signer.clone())?)
        }
        ZenTaoBackend::Api {
            admin_token,
            credentials,
            default_password,
        } => {
            let mut api = ZenTaoApi::new(config.signer.clone());
            if let Some(token) = admin_token {
                api = api.with_admin_token(token.as_str());
            }
            if let Some(credentials) = credentials {
                api = api.with_admin_credentials(credentials.clone());
            }
            if let Some(password) = default_password {
                api = api.with_default_password(password.as_str());
            }
            Arc::new(api)
        }
    };

    let (bindings, tickets): (Arc<dyn BindingStore>, Arc<dyn TicketStore>) = match &config.store
    {
        StoreBackend::Sqlite { url } => {
            let options = SqliteConnectOptions::from_str(url)
                .context("invalid SSO_DATABASE_URL")?
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await
                .context("failed to open the SSO database")?;
            let store = Arc::new(SqliteStore::new(pool).with_ttl(config.ticket_ttl));
            store.init_schema().await.context("failed to create SSO tables")?;
            let bindings: Arc<dyn BindingStore> = store.clone();
            (bindings, store)
        }
        StoreBackend::File { dir } => {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("failed to create {}", dir.display()))?;
            let bindings: Arc<dyn BindingStore> = Arc::new(FileBindingStore::in_dir(dir));
            let tickets: Arc<dyn TicketStore> =
                Arc::new(FileTicketStore::in_dir(dir).with_ttl(config.ticket_ttl));
            (bindings, tickets)
        }
    };

    match tickets.purge_expired().await {
        Ok(count) if count > 0 => {
            tracing::info!(purged_tickets = count, "purged expired tickets on startup");
        }
        Ok(_) => {}
        Err(e) => tracing::warn!(error = %e, "failed to purge expired tickets on startup"),
    }

    let purge_tickets = tickets.clone();
    let purge_interval = config.purge_interval;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(purge_interval);
        loop {
            interval.tick().await;
            match purge_tickets.purge_expired().await {
                Ok(count) if count > 0 => {
                    tracing::debug!(purged_tickets = count, "periodic ticket purge");
                }
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "failed to purge expired tickets"),
            }
        }
    });

    let provider = Arc::new(DingTalkClient::new(config.dingtalk));
    let resolver = Arc::new(AccountResolver::new(config.policy, target.clone(), bindings));
    let state = GatewayState::new(config.gateway, provider, resolver, target, tickets)
        .with_relay(SessionRelay::new().with_secure_cookies(config.secure_cookies));
    let app = gateway_routes(state);

    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    tracing::info!("listening on http://{}", config.listen);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
