//! Peer session state machine (component F): WebRTC offer/answer
//! negotiation and the data-channel lifecycle shared by host and
//! guest flows.

pub mod guest;
pub mod host;

use thiserror::Error;
use tokio::sync::mpsc;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::RTCPeerConnection;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),
    #[error(transparent)]
    Codec(#[from] sdp_codec::CodecError),
    #[error(transparent)]
    Signaling(#[from] crate::signaling::SignalingError),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("refusing to host: not inside a multiplexer session, or tmux not on PATH")]
    NotInMultiplexerSession,
    #[error("refusing to join as guest: already inside a multiplexer session")]
    AlreadyInSession,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Capacity-one error bus: the first error posted by any callback or
/// loop ends the session.
pub type ErrorBus = mpsc::Sender<SessionError>;

/// Build a fresh error bus. The sender is cloned into every
/// data-channel callback and the SIGINT handler; the receiver is
/// owned by the host/guest run loop, which ends as soon as anything
/// posts to it.
pub fn error_bus() -> (ErrorBus, mpsc::Receiver<SessionError>) {
    mpsc::channel(1)
}

pub async fn new_peer_connection(stun_server: &str) -> Result<RTCPeerConnection, SessionError> {
    let mut media_engine = MediaEngine::default();
    media_engine.register_default_codecs()?;

    let mut registry = Registry::new();
    registry = register_default_interceptors(registry, &mut media_engine)?;

    let api = APIBuilder::new()
        .with_media_engine(media_engine)
        .with_interceptor_registry(registry)
        .build();

    let config = RTCConfiguration {
        ice_servers: vec![RTCIceServer {
            urls: vec![stun_server.to_string()],
            ..Default::default()
        }],
        ..Default::default()
    };

    Ok(api.new_peer_connection(config).await?)
}

/// Block until ICE gathering finishes or a 10s timeout expires, then
/// return the local description including gathered candidates.
pub async fn local_description_with_ice(
    pc: &RTCPeerConnection,
) -> Result<webrtc::peer_connection::sdp::session_description::RTCSessionDescription, SessionError>
{
    use std::sync::Arc;
    use tokio::sync::Mutex;

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let tx = Arc::new(Mutex::new(Some(tx)));

    pc.on_ice_gathering_state_change(Box::new(move |state| {
        if state == webrtc::ice_transport::ice_gatherer_state::RTCIceGathererState::Complete {
            let tx = tx.clone();
            Box::pin(async move {
                if let Some(tx) = tx.lock().await.take() {
                    let _ = tx.send(());
                }
            })
        } else {
            Box::pin(async {})
        }
    }));

    tokio::select! {
        _ = rx => {}
        () = tokio::time::sleep(std::time::Duration::from_secs(10)) => {}
    }

    pc.local_description()
        .await
        .ok_or_else(|| SessionError::Transport("no local description after ICE gathering".into()))
}
