use actix::*;
use actix_web::{get, web, Error, HttpRequest, HttpResponse};
use peer_session::PeerId;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use super::{client, moderator::Moderator};

pub struct AppKey(pub SecretString);

#[derive(Debug, serde::Deserialize)]
pub struct PeerQuery {
    id: PeerId,
    key: String,
}

#[get("/health_check")]
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().finish()
}

/// Upgrades to the signaling websocket for the peer named in the query.
#[get("/peerjs")]
pub async fn peerjs(
    req: HttpRequest,
    query: web::Query<PeerQuery>,
    stream: web::Payload,
    key: web::Data<AppKey>,
    moderator: web::Data<Addr<Moderator>>,
) -> Result<HttpResponse, Error> {
    let PeerQuery { id, key: presented } = query.into_inner();
    if presented != *key.0.expose_secret() {
        warn!(%id, "rejecting client with wrong key");
        return Ok(HttpResponse::Unauthorized().finish());
    }
    if id.as_str().trim().is_empty() {
        return Ok(HttpResponse::BadRequest().body("empty peer id"));
    }
    let websocket = client::WsClient::new(id, moderator.get_ref().clone());
    client::start(websocket, &req, stream)
}
