mod auth;
mod bootstrap;
mod config;
mod entity;
mod error;
mod input;
mod loan;
mod models;
mod password;
mod role;
mod routes;

use actix_web::{middleware::Logger, web::{route, Data}, App, HttpServer};
use anyhow::Context;
use config::Config;
use entity::Entity;
use std::{
    env,
    net::{Ipv4Addr, SocketAddrV4},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load()?;
    let entity = Entity::new(&config.database_url, config.max_connections)
        .await
        .context("failed to connect to database")?;

    if env::args().nth(1).as_deref() == Some("bootstrap") {
        let result = bootstrap::run(&entity, &config).await;
        entity.close().await;
        return result;
    }

    entity.migrate().await.context("failed to run migrations")?;

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.port);
    info!(%addr, "listening");

    let entity_app_state = entity.clone();
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::default())
            .app_data(Data::new(entity_app_state.clone()))
            .configure(routes::configure)
            .default_service(route().to(routes::fallback))
    })
    .bind(addr)?
    .run()
    .await?;

    entity.close().await;
    Ok(())
}
