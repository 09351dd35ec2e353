use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{web, App, HttpResponse, HttpServer};

use server::connection::ws_index;
use server::file_store::FileStore;
use server::server::spawn_server;
use system::{DocumentStore, LocalTaskService, TaskService};

async fn health() -> HttpResponse {
    HttpResponse::Ok().json("Backend is Running ...")
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let data_dir = std::env::var("DATA_DIR").unwrap_or_else(|_| "data".to_owned());
    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0".to_owned());
    let port = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(3000);

    let store: Arc<dyn DocumentStore> = Arc::new(FileStore::new(data_dir));
    let tasks: Arc<dyn TaskService> = Arc::new(LocalTaskService::new());
    let srv_tx = spawn_server(store, tasks);

    log::info!("server is running on {}:{}", bind_addr, port);
    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .app_data(web::Data::new(srv_tx.clone()))
            .route("/ws/", web::get().to(ws_index))
            .route("/", web::get().to(health))
    })
    .bind((bind_addr.as_str(), port))?
    .run()
    .await
}
