use crate::communicator::{self, CommunicatorState};
use crate::config::Settings;
use crate::gateway::dispatcher::{self, GatewayState, HttpForwarder};
use crate::gateway::limiter::RateLimitGate;
use crate::gateway::tenants::{ControlPlaneClient, TenantConfigStore};
use crate::store::{RedisStore, SharedStore};
use crate::Result;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Main application struct that coordinates both listeners
pub struct Application {
    settings: Settings,
}

impl Application {
    #[instrument]
    pub async fn new() -> Result<Self> {
        let settings = Settings::new()?;
        Ok(Self { settings })
    }

    #[instrument(skip(self))]
    pub async fn run(self) -> Result<()> {
        let settings = self.settings;

        info!(redis_url = %settings.store.redis_url, "Connecting to shared store");
        let store: Arc<dyn SharedStore> =
            Arc::new(RedisStore::connect(&settings.store.redis_url).await?);

        let tenants = TenantConfigStore::new(
            store.clone(),
            ControlPlaneClient::new(
                settings.control_plane.base_url.clone(),
                settings.control_plane.api_token.clone(),
            ),
            Duration::from_secs(settings.cache.tenant_config_ttl_seconds),
            settings.cache.usage_ceiling,
        );

        let gateway_state = Arc::new(GatewayState {
            tenants,
            limiter: RateLimitGate::new(store.clone()),
            forwarder: Arc::new(HttpForwarder::new(Duration::from_secs(
                settings.application.upstream_timeout_seconds,
            ))),
            edge_mode: settings.application.edge_mode(),
        });

        let gateway_router = dispatcher::router(gateway_state)
            .into_make_service_with_connect_info::<SocketAddr>();
        let communicator_router = communicator::router(CommunicatorState::new(
            store,
            settings.communicator.secret.clone(),
        ));

        let gateway_listener = tokio::net::TcpListener::bind((
            settings.application.host.as_str(),
            settings.application.gateway_port,
        ))
        .await?;
        let communicator_listener = tokio::net::TcpListener::bind((
            settings.application.host.as_str(),
            settings.application.communicator_port,
        ))
        .await?;

        info!(
            host = %settings.application.host,
            gateway_port = settings.application.gateway_port,
            communicator_port = settings.application.communicator_port,
            edge_mode = settings.application.edge_mode(),
            "Tollgate listening"
        );

        tokio::try_join!(
            axum::serve(gateway_listener, gateway_router).into_future(),
            axum::serve(communicator_listener, communicator_router).into_future(),
        )?;

        Ok(())
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }
}
