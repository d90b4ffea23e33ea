use async_trait::async_trait;
use conductor_core::{
    models::{Organization, Team, User},
    ConductorResult, OrganizationRepository,
};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};

use super::{conflict_or, decode, encode};

pub struct SqliteOrganizationRepository {
    pool: SqlitePool,
}

impl SqliteOrganizationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn fetch<T: serde::de::DeserializeOwned>(
        &self,
        sql: &str,
        id: i64,
    ) -> ConductorResult<Option<(i64, T)>> {
        let row = sqlx::query(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some((row.try_get("id")?, decode(&row)?))),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl OrganizationRepository for SqliteOrganizationRepository {
    #[instrument(skip(self, organization), fields(name = %organization.name))]
    async fn create_organization(
        &self,
        organization: &Organization,
    ) -> ConductorResult<Organization> {
        let id: i64 = sqlx::query(
            "INSERT INTO organizations (name, active, data) VALUES (?, ?, ?) RETURNING id",
        )
        .bind(&organization.name)
        .bind(organization.active)
        .bind(encode(organization)?)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        debug!("创建组织: {} ({})", organization.name, id);
        Ok(Organization {
            id,
            ..organization.clone()
        })
    }

    async fn get_organization(&self, id: i64) -> ConductorResult<Option<Organization>> {
        Ok(self
            .fetch::<Organization>("SELECT id, data FROM organizations WHERE id = ?", id)
            .await?
            .map(|(id, org)| Organization { id, ..org }))
    }

    #[instrument(skip(self, user), fields(username = %user.username))]
    async fn create_user(&self, user: &User) -> ConductorResult<User> {
        let id: i64 =
            sqlx::query("INSERT INTO users (username, active, data) VALUES (?, ?, ?) RETURNING id")
                .bind(&user.username)
                .bind(user.active)
                .bind(encode(user)?)
                .fetch_one(&self.pool)
                .await
                .map_err(|e| conflict_or(e, "用户名"))?
                .try_get("id")?;

        Ok(User {
            id,
            ..user.clone()
        })
    }

    async fn get_user(&self, id: i64) -> ConductorResult<Option<User>> {
        Ok(self
            .fetch::<User>("SELECT id, data FROM users WHERE id = ?", id)
            .await?
            .map(|(id, user)| User { id, ..user }))
    }

    async fn create_team(&self, team: &Team) -> ConductorResult<Team> {
        let id: i64 = sqlx::query(
            "INSERT INTO teams (organization_id, name, active, data) VALUES (?, ?, ?, ?) RETURNING id",
        )
        .bind(team.organization_id)
        .bind(&team.name)
        .bind(team.active)
        .bind(encode(team)?)
        .fetch_one(&self.pool)
        .await?
        .try_get("id")?;

        Ok(Team {
            id,
            ..team.clone()
        })
    }

    async fn get_team(&self, id: i64) -> ConductorResult<Option<Team>> {
        Ok(self
            .fetch::<Team>("SELECT id, data FROM teams WHERE id = ?", id)
            .await?
            .map(|(id, team)| Team { id, ..team }))
    }
}
