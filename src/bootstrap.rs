//! One-off setup run with `library-desk bootstrap`. Safe to repeat.
use crate::{config::Config, entity::Entity};
use anyhow::{Context, Result};
use tracing::info;

pub const DEFAULT_GROUPS: [&str; 2] = ["Staff", "User"];

pub async fn run(entity: &Entity, config: &Config) -> Result<()> {
    entity.migrate().await.context("failed to run migrations")?;
    info!("migrations applied");

    let created = entity
        .group_seed(&DEFAULT_GROUPS)
        .await
        .context("failed to seed groups")?;
    info!(created, "groups seeded");

    if let Some(admin) = &config.bootstrap_admin {
        let created = entity
            .admin_seed(&admin.email, &admin.password)
            .await
            .context("failed to seed administrator")?;
        if created {
            info!(email = %admin.email, "administrator created");
        } else {
            info!(email = %admin.email, "administrator already exists");
        }
    }

    Ok(())
}
