use std::{
    io,
    net::{SocketAddr, ToSocketAddrs},
    time::Duration,
};

use actix_web::{guard, web, App, HttpResponse, HttpServer};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::model::Uptime;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Liveness probe on its own listener: `GET /health` answers 200, anything else 404.
pub struct HealthEndpoint;

impl HealthEndpoint {
    pub fn run(
        address: impl ToSocketAddrs,
        uptime: Uptime,
        cancellation_token: CancellationToken,
    ) -> io::Result<SocketAddr> {
        serve(address, uptime, cancellation_token, REQUEST_TIMEOUT)
    }
}

fn serve(
    address: impl ToSocketAddrs,
    uptime: Uptime,
    cancellation_token: CancellationToken,
    request_timeout: Duration,
) -> io::Result<SocketAddr> {
    let server = HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(uptime))
            .configure(routes)
    })
    .workers(1)
    .disable_signals()
    .client_request_timeout(request_timeout)
    .bind(address)?;
    let local_address = server
        .addrs()
        .first()
        .copied()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no address bound"))?;
    info!("Health endpoint listening on {}", local_address);

    let server = server.run();
    let server_handle = server.handle();
    tokio::spawn(async move {
        if let Err(e) = server.await {
            error!("Health endpoint failed: {}", e);
        }
    });
    tokio::spawn(async move {
        cancellation_token.cancelled().await;
        server_handle.stop(true).await;
    });

    Ok(local_address)
}

fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/health")
            .guard(guard::Get())
            .to(health_handler),
    )
    .default_service(web::to(not_found_handler));
}

async fn health_handler(uptime: web::Data<Uptime>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain")
        .insert_header(("Access-Control-Allow-Origin", "*"))
        .body(format!("OK - uptime={:.2}s\n", uptime.seconds()))
}

async fn not_found_handler() -> HttpResponse {
    HttpResponse::NotFound().finish()
}

#[cfg(test)]
mod tests {
    use actix_web::{http::StatusCode, test};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };

    use super::*;

    #[actix_rt::test]
    async fn health_path_is_ok() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(Uptime::start()))
                .configure(routes),
        )
        .await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let body = test::read_body(resp).await;
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.starts_with("OK - uptime="));
        assert!(body.ends_with("s\n"));
    }

    #[actix_rt::test]
    async fn other_routes_are_not_found() {
        let app = test::init_service(
            App::new()
                .app_data(web::Data::new(Uptime::start()))
                .configure(routes),
        )
        .await;

        for req in [
            test::TestRequest::get().uri("/").to_request(),
            test::TestRequest::get().uri("/healthz").to_request(),
            test::TestRequest::post().uri("/health").to_request(),
        ] {
            let resp = test::call_service(&app, req).await;
            assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        }
    }

    async fn probe(address: SocketAddr, request: &str) -> String {
        let mut stream = TcpStream::connect(address).await.unwrap();
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[tokio::test]
    async fn serves_probes_on_own_port() {
        let cancellation_token = CancellationToken::new();
        let address =
            HealthEndpoint::run("127.0.0.1:0", Uptime::start(), cancellation_token.clone())
                .unwrap();

        let response = probe(
            address,
            "GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 200 OK"));
        assert!(response.contains("OK - uptime="));

        let response = probe(
            address,
            "GET /other HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n",
        )
        .await;
        assert!(response.starts_with("HTTP/1.1 404"));

        cancellation_token.cancel();
    }

    #[tokio::test]
    async fn idle_client_is_dropped() {
        let cancellation_token = CancellationToken::new();
        let address = serve(
            "127.0.0.1:0",
            Uptime::start(),
            cancellation_token.clone(),
            Duration::from_millis(200),
        )
        .unwrap();

        let mut stream = TcpStream::connect(address).await.unwrap();
        let mut response = Vec::new();
        let closed =
            tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut response)).await;
        assert!(closed.is_ok());

        cancellation_token.cancel();
    }
}
