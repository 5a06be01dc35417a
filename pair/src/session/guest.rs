//! Guest flow: decode an offer, answer it, then bridge the local
//! terminal (in raw mode) to the data channel.

use std::io::{Read, Write};
use std::sync::Arc;

use bytes::Bytes;
use sdp_codec::SessionDescription;
use tokio::sync::mpsc;
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::control::ControlMessage;
use crate::mux::Multiplexer;
use crate::signaling::SignalingClient;
use crate::terminal::{window_size, RawModeGuard};

use super::{local_description_with_ice, new_peer_connection, SessionError};

pub struct GuestOptions {
    pub stun_server: String,
    pub offer_url: String,
}

pub async fn run(
    mux: &dyn Multiplexer,
    opts: GuestOptions,
    error_tx: super::ErrorBus,
    mut error_rx: mpsc::Receiver<SessionError>,
) -> Result<(), SessionError> {
    if mux.is_within() {
        return Err(SessionError::AlreadyInSession);
    }

    let pc = Arc::new(new_peer_connection(&opts.stun_server).await?);

    let dc_init = RTCDataChannelInit {
        ordered: Some(true),
        max_packet_life_time: Some(1000),
        ..Default::default()
    };
    let dc = pc.create_data_channel("data", Some(dc_init)).await?;

    let client = SignalingClient::new();
    let offer_encoded = client.get(&opts.offer_url).await?;
    let offer_sd = SessionDescription::decode(&offer_encoded)?;

    let offer = RTCSessionDescription::offer(offer_sd.sdp)?;
    pc.set_remote_description(offer).await?;

    let answer = pc.create_answer(None).await?;
    pc.set_local_description(answer).await?;
    let local_desc = local_description_with_ice(&pc).await?;

    let answer_sd = SessionDescription {
        sdp: local_desc.sdp,
        sdp_uri: offer_sd.sdp_uri,
        sdp_answer_uri: offer_sd.sdp_answer_uri.clone(),
    };
    client
        .put(&offer_sd.sdp_answer_uri, answer_sd.encode()?)
        .await?;

    let raw_guard = Arc::new(tokio::sync::Mutex::new(None::<RawModeGuard>));

    register_data_channel(&dc, error_tx.clone(), raw_guard.clone());

    match error_rx.recv().await {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn register_data_channel(
    dc: &Arc<RTCDataChannel>,
    error_tx: super::ErrorBus,
    raw_guard: Arc<tokio::sync::Mutex<Option<RawModeGuard>>>,
) {
    let open_dc = dc.clone();
    let open_error_tx = error_tx.clone();
    let open_raw_guard = raw_guard.clone();
    dc.on_open(Box::new(move || {
        let dc = open_dc.clone();
        let error_tx = open_error_tx.clone();
        let raw_guard = open_raw_guard.clone();
        Box::pin(async move {
            match RawModeGuard::enable() {
                Ok(guard) => *raw_guard.lock().await = Some(guard),
                Err(err) => {
                    let _ = error_tx.try_send(SessionError::Io(err));
                    return;
                }
            }

            if let Ok(size) = window_size() {
                let _ = dc.send_text(ControlMessage::encode_set_size(size)).await;
            }
            spawn_sigwinch_watcher(dc.clone());
            spawn_stdin_reader(dc.clone(), error_tx.clone());
        })
    }));

    let message_raw_guard = raw_guard.clone();
    let message_error_tx = error_tx.clone();
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        let raw_guard = message_raw_guard.clone();
        let error_tx = message_error_tx.clone();
        Box::pin(async move {
            if !msg.is_string {
                let mut stdout = std::io::stdout();
                let _ = stdout.write_all(&msg.data);
                let _ = stdout.flush();
                return;
            }

            let text = String::from_utf8_lossy(&msg.data);
            if text == "quit" {
                raw_guard.lock().await.take();
                let _ = error_tx.try_send(SessionError::Transport("session ended".into()));
            } else {
                let _ = error_tx.try_send(SessionError::Transport(format!(
                    "unexpected text frame from host: {text}"
                )));
            }
        })
    }));

    let close_raw_guard = raw_guard.clone();
    dc.on_close(Box::new(move || {
        let raw_guard = close_raw_guard.clone();
        Box::pin(async move {
            raw_guard.lock().await.take();
        })
    }));
}

fn spawn_stdin_reader(dc: Arc<RTCDataChannel>, error_tx: super::ErrorBus) {
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(64);
    std::thread::spawn(move || {
        let mut stdin = std::io::stdin();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(_) => break,
            }
        }
    });

    tokio::spawn(async move {
        while let Some(chunk) = rx.recv().await {
            if dc.send(&Bytes::from(chunk)).await.is_err() {
                let _ = error_tx.try_send(SessionError::Transport("data channel closed".into()));
                break;
            }
        }
    });
}

fn spawn_sigwinch_watcher(dc: Arc<RTCDataChannel>) {
    #[cfg(unix)]
    {
        tokio::spawn(async move {
            let Ok(mut signal) =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::window_change())
            else {
                return;
            };
            loop {
                signal.recv().await;
                if let Ok(size) = window_size() {
                    let _ = dc.send_text(ControlMessage::encode_set_size(size)).await;
                }
            }
        });
    }
    #[cfg(not(unix))]
    {
        let _ = dc;
    }
}
