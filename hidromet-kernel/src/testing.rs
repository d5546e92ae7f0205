//! Serveurs amont factices pour les tests (Arduino, Weathercloud)

use axum::Router;
use tokio::net::TcpListener;

/// Lance `router` sur un port éphémère local et renvoie son URL de base
pub async fn spawn_upstream(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}
