pub mod member_service;
pub mod settings_service;

use std::sync::Arc;

use crate::{
    auth::SessionStore,
    config::Settings,
    db::Database,
    error::Result,
    repository::*,
};
use member_service::MemberService;
use settings_service::SettingsService;

/// Every repository of the data access layer, wired over one [`DataContext`].
pub struct ServiceContext {
    pub member_repo: Arc<dyn MemberRepository>,
    pub media_repo: Arc<dyn MediaRepository>,
    pub presence_repo: Arc<dyn PresenceRepository>,
    pub search_repo: Arc<dyn SearchRepository>,
    pub membership_repo: Arc<dyn MembershipRepository>,
    pub auth_repo: Arc<dyn AuthRepository>,
    pub settings_service: Arc<SettingsService>,
    pub member_service: Arc<MemberService>,
    pub data: DataContext,
}

impl ServiceContext {
    pub fn new(data: DataContext, settings_service: SettingsService) -> Self {
        Self::wire(data, Arc::new(settings_service))
    }

    /// Rewires every repository over `session`, leaving the pool, cache and
    /// settings shared. Each request gets its own session this way.
    pub fn for_session(&self, session: Arc<dyn SessionStore>) -> Self {
        Self::wire(self.data.clone().with_session(session), self.settings_service.clone())
    }

    fn wire(data: DataContext, settings_service: Arc<SettingsService>) -> Self {
        let member_repo: Arc<dyn MemberRepository> = Arc::new(SqliteMemberRepository::new(data.clone()));
        let presence_repo: Arc<dyn PresenceRepository> = Arc::new(SqlitePresenceRepository::new(data.clone()));
        let auth_repo: Arc<dyn AuthRepository> = Arc::new(SqliteAuthRepository::new(data.clone()));

        let member_service = Arc::new(MemberService::new(
            member_repo.clone(),
            auth_repo.clone(),
            presence_repo.clone(),
            data.clone(),
        ));

        Self {
            media_repo: Arc::new(SqliteMediaRepository::new(data.clone())),
            search_repo: Arc::new(SqliteSearchRepository::new(data.clone())),
            membership_repo: Arc::new(SqliteMembershipRepository::new(data.clone())),
            settings_service,
            member_repo,
            presence_repo,
            auth_repo,
            member_service,
            data,
        }
    }

    /// Connects, migrates and wires the production collaborators.
    pub async fn connect(settings: &Settings) -> Result<Self> {
        let db = Database::connect(&settings.database).await?;
        db.migrate().await?;
        tracing::info!("Connected to {}", settings.database.url);

        let settings_service = SettingsService::new(db.clone(), settings.system.clone());
        let data = DataContext::new(db, settings);
        Ok(Self::new(data, settings_service))
    }
}
