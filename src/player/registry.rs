use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::info;

use crate::{
    common::{
        PlayerResult,
        types::{NodeId, TenantId},
    },
    player::{context::PlayerContext, events::PlayerEvent, session::Session},
};

/// Tenant id to session. At most one session exists per tenant.
pub struct SessionRegistry {
    ctx: Arc<PlayerContext>,
    sessions: DashMap<TenantId, Arc<Session>>,
    creating: DashMap<TenantId, Arc<Mutex<()>>>,
}

impl SessionRegistry {
    pub fn new(ctx: Arc<PlayerContext>) -> Arc<Self> {
        Arc::new(Self {
            ctx,
            sessions: DashMap::new(),
            creating: DashMap::new(),
        })
    }

    /// Cache lookup only.
    pub fn resolve(&self, tenant: &str) -> Option<Arc<Session>> {
        self.sessions.get(tenant).map(|s| s.value().clone())
    }

    /// Returns the tenant's session, creating it and binding a node on first
    /// use.
    pub async fn get_or_create(self: &Arc<Self>, tenant: &TenantId) -> PlayerResult<Arc<Session>> {
        if let Some(session) = self.resolve(tenant) {
            return Ok(session);
        }

        let lock = self.creating.entry(tenant.clone()).or_default().clone();
        let result = {
            let _guard = lock.lock().await;
            match self.resolve(tenant) {
                Some(session) => Ok(session),
                None => self.create(tenant).await,
            }
        };
        // The last waiter out drops the entry, whether creation worked or not.
        self.creating
            .remove_if(tenant, |_, l| Arc::ptr_eq(l, &lock) && Arc::strong_count(l) == 2);
        result
    }

    async fn create(self: &Arc<Self>, tenant: &TenantId) -> PlayerResult<Arc<Session>> {
        let node = self.ctx.pool.spawn().await?;
        self.ctx.pool.bind(node)?;

        let session = Arc::new(Session::new(
            tenant.clone(),
            node,
            self.ctx.clone(),
            Arc::downgrade(self),
        ));
        self.sessions.insert(tenant.clone(), session.clone());

        info!("Created session for {} on {}", tenant, node);
        self.ctx.emit(PlayerEvent::SessionCreate {
            tenant: tenant.clone(),
            node,
        });
        Ok(session)
    }

    /// Removes the session, cancels its timers and releases its node.
    pub async fn destroy(&self, tenant: &str) -> bool {
        let Some((tenant, session)) = self.sessions.remove(tenant) else {
            return false;
        };
        session.shutdown().await;

        info!("Destroyed session for {}", tenant);
        self.ctx.emit(PlayerEvent::SessionDelete { tenant });
        true
    }

    /// Sessions currently bound to `node`.
    pub fn sessions_on(&self, node: NodeId) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .filter(|s| s.node() == Some(node))
            .map(|s| s.value().clone())
            .collect()
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|s| s.value().clone()).collect()
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        self.sessions.iter().map(|s| s.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        common::PlayerError,
        configs::Config,
        node::{NodePool, testing::ScriptedSpawner},
        sources::ExtractorRegistry,
    };

    fn registry(spawner: &ScriptedSpawner) -> Arc<SessionRegistry> {
        let config = Config::default();
        let pool = NodePool::new(&config.pool, Arc::new(spawner.clone())).unwrap();
        SessionRegistry::new(Arc::new(PlayerContext::new(
            config.player.clone(),
            pool,
            Arc::new(ExtractorRegistry::new()),
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_creation_drops_tenant_lock() {
        let spawner = ScriptedSpawner::new();
        spawner.withhold_ready(true);
        let registry = registry(&spawner);
        let tenant = TenantId::from("g1");

        let err = registry.get_or_create(&tenant).await.unwrap_err();
        assert!(matches!(err, PlayerError::SpawnTimeout { .. }));
        assert!(registry.creating.is_empty());
        assert!(registry.is_empty());

        spawner.withhold_ready(false);
        let session = registry.get_or_create(&tenant).await.unwrap();
        assert_eq!(session.tenant(), &tenant);
        assert!(registry.creating.is_empty());
        assert!(Arc::ptr_eq(&registry.get_or_create(&tenant).await.unwrap(), &session));
    }
}
