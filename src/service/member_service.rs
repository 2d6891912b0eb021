use std::sync::Arc;

use crate::{
    auth::{SESSION_GROUP_ID_KEY, SESSION_MEMBER_ID_KEY},
    domain::*,
    error::{AppError, Result},
    repository::{AuthRepository, DataContext, MemberRepository, PresenceRepository},
};

/// Registration and sign-in flows built on the repositories.
pub struct MemberService {
    repo: Arc<dyn MemberRepository>,
    auth: Arc<dyn AuthRepository>,
    presence: Arc<dyn PresenceRepository>,
    ctx: DataContext,
}

impl MemberService {
    pub fn new(
        repo: Arc<dyn MemberRepository>,
        auth: Arc<dyn AuthRepository>,
        presence: Arc<dyn PresenceRepository>,
        ctx: DataContext,
    ) -> Self {
        Self { repo, auth, presence, ctx }
    }

    async fn taken(&self, email: Option<&str>, username: Option<&str>) -> Result<bool> {
        match self.repo.resolve_id(email, username, Realm::Members).await {
            Ok(_) => Ok(true),
            Err(AppError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Registers a member unless the same address joined within `wait_minutes`.
    pub async fn register(&self, member: NewMember, wait_minutes: i64) -> Result<i64> {
        if wait_minutes > 0
            && !self
                .repo
                .check_wait_join(&member.ip, wait_minutes, self.ctx.now(), Realm::Members)
                .await?
        {
            return Err(AppError::Forbidden(format!(
                "Please wait {} minutes between registrations",
                wait_minutes
            )));
        }

        // Check for duplicate email
        if self.taken(Some(&member.email), None).await? {
            return Err(AppError::Conflict("Email already exists".to_string()));
        }

        // Check for duplicate username
        if self.taken(None, Some(&member.username)).await? {
            return Err(AppError::Conflict("Username already exists".to_string()));
        }

        let profile_id = self.repo.add(member).await?;
        tracing::info!("Registered member {}", profile_id);
        Ok(profile_id)
    }

    /// Checks credentials, records the login and binds the member to the session.
    pub async fn authenticate(&self, email: &str, password: &str, realm: Realm) -> Result<i64> {
        self.auth.login(email, password, realm).await?;

        let profile_id = self.repo.resolve_id(Some(email), None, realm).await?;
        let member = self.repo.read(profile_id, realm).await?;
        if member.ban {
            return Err(AppError::Forbidden(format!("{} {} is banned", realm, profile_id)));
        }

        self.auth
            .session_log(&member.email, &member.username, member.first_name.as_deref(), realm)
            .await?;

        let session = &self.ctx.session;
        session.regenerate_id();
        session.set(SESSION_MEMBER_ID_KEY, &profile_id.to_string());
        session.set(SESSION_GROUP_ID_KEY, &member.group_id.to_string());

        self.repo.set_last_activity(profile_id, realm).await?;
        if realm == Realm::Members {
            self.presence.set_user_status(profile_id, UserStatus::Online).await?;
        }

        tracing::info!("{} {} signed in", realm, profile_id);
        Ok(profile_id)
    }

    /// Marks a signed-in member offline.
    pub async fn sign_out(&self, profile_id: i64) -> Result<()> {
        self.presence.set_user_status(profile_id, UserStatus::Offline).await?;
        self.ctx.session.regenerate_id();
        tracing::info!("Member {} signed out", profile_id);
        Ok(())
    }
}
