//! Host flow: publish an offer, wait for the guest's answer, then
//! bridge a freshly-attached multiplexer PTY to the data channel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use rand::RngCore;
use sdp_codec::SessionDescription;
use tokio::sync::{mpsc, Mutex};
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;

use crate::control::ControlMessage;
use crate::mux::Multiplexer;
use crate::pty::PtySession;
use crate::signaling::SignalingClient;

use super::{local_description_with_ice, new_peer_connection, ErrorBus, SessionError};

pub struct HostOptions {
    pub stun_server: String,
    pub sdp_server: String,
    pub session_name: String,
}

/// Generate a 32-random-byte, URL-safe-base64 rendezvous path.
fn random_pipe_path(sdp_server: &str) -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    use base64::Engine;
    let token = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes);
    format!("{sdp_server}/p/{token}")
}

pub async fn run(
    mux: &dyn Multiplexer,
    opts: HostOptions,
    error_tx: ErrorBus,
    mut error_rx: mpsc::Receiver<SessionError>,
) -> Result<(), SessionError> {
    if !mux.has_binary() || !mux.is_within() {
        return Err(SessionError::NotInMultiplexerSession);
    }
    mux.ensure_session(&opts.session_name)
        .map_err(|e| SessionError::Transport(e.to_string()))?;
    let current_session = mux.current_session();
    if current_session.as_deref() == Some(opts.session_name.as_str()) {
        return Err(SessionError::NotInMultiplexerSession);
    }

    // The client attached to the operator's current session is the one
    // handed over to the new session once negotiation completes, same
    // as the original picking the last non-empty `GetClientsInSession`
    // entry for the session it was run from.
    let tmux_client = match &current_session {
        Some(session) => mux
            .attached_clients(session)
            .map_err(|e| SessionError::Transport(e.to_string()))?
            .into_iter()
            .filter(|c| !c.is_empty())
            .next_back()
            .unwrap_or_default(),
        None => String::new(),
    };

    let offer_uri = random_pipe_path(&opts.sdp_server);
    let answer_uri = random_pipe_path(&opts.sdp_server);

    let pc = Arc::new(new_peer_connection(&opts.stun_server).await?);

    let pty_ready = Arc::new(AtomicBool::new(false));
    let attach_command = mux.attach_command(&opts.session_name);

    register_on_data_channel(&pc, error_tx.clone(), pty_ready, attach_command);

    let offer = pc.create_offer(None).await?;
    pc.set_local_description(offer).await?;
    let local_desc = local_description_with_ice(&pc).await?;

    let sd = SessionDescription {
        sdp: local_desc.sdp,
        sdp_uri: offer_uri.clone(),
        sdp_answer_uri: answer_uri.clone(),
    };
    let encoded = sd.encode()?;

    println!("Run this on the guest machine:");
    println!("  pair {offer_uri}");
    println!("Press enter once you've shared the command above...");
    let mut discard = String::new();
    std::io::stdin().read_line(&mut discard)?;

    let client = SignalingClient::new();
    client.put(&offer_uri, encoded).await?;

    let answer_encoded = client.get(&answer_uri).await?;
    let answer_sd = SessionDescription::decode(&answer_encoded)?;
    let answer = RTCSessionDescription::answer(answer_sd.sdp)?;
    pc.set_remote_description(answer).await?;

    mux.move_client(&tmux_client, &opts.session_name)
        .map_err(|e| SessionError::Transport(e.to_string()))?;

    match error_rx.recv().await {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn register_on_data_channel(
    pc: &Arc<RTCPeerConnection>,
    error_tx: ErrorBus,
    pty_ready: Arc<AtomicBool>,
    attach_command: (String, Vec<String>),
) {
    pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
        let error_tx = error_tx.clone();
        let pty_ready = pty_ready.clone();
        let attach_command = attach_command.clone();
        let pty_slot: Arc<Mutex<Option<PtySession>>> = Arc::new(Mutex::new(None));

        let dc_open = dc.clone();
        let open_error_tx = error_tx.clone();
        let open_pty_slot = pty_slot.clone();
        let open_pty_ready = pty_ready.clone();
        dc.on_open(Box::new(move || {
            let dc = dc_open.clone();
            let error_tx = open_error_tx.clone();
            let pty_slot = open_pty_slot.clone();
            let pty_ready = open_pty_ready.clone();
            let (program, args) = attach_command.clone();
            Box::pin(async move {
                match PtySession::spawn(24, 80, &program, &args) {
                    Ok((session, mut output_rx)) => {
                        *pty_slot.lock().await = Some(session);
                        pty_ready.store(true, Ordering::SeqCst);
                        while let Some(chunk) = output_rx.recv().await {
                            if dc.send(&Bytes::from(chunk)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        let _ = error_tx.try_send(SessionError::Transport(err.to_string()));
                    }
                }
            })
        }));

        let message_pty_slot = pty_slot.clone();
        let message_pty_ready = pty_ready.clone();
        let message_error_tx = error_tx.clone();
        dc.on_message(Box::new(move |msg: DataChannelMessage| {
            let pty_slot = message_pty_slot.clone();
            let pty_ready = message_pty_ready.clone();
            let error_tx = message_error_tx.clone();
            Box::pin(async move {
                if !pty_ready.load(Ordering::SeqCst) {
                    return;
                }
                let mut guard = pty_slot.lock().await;
                let Some(pty) = guard.as_mut() else { return };

                if !msg.is_string {
                    let _ = pty.write_all(&msg.data);
                    return;
                }

                let text = String::from_utf8_lossy(&msg.data);
                match ControlMessage::parse(&text) {
                    Ok(ControlMessage::Stdin(bytes)) => {
                        let _ = pty.write_all(&bytes);
                    }
                    Ok(ControlMessage::SetSize(size)) => {
                        let _ = pty.resize(size);
                    }
                    Ok(ControlMessage::Quit) => {
                        let _ = pty.kill();
                        let _ = error_tx.try_send(SessionError::Transport("guest ended session".into()));
                    }
                    Err(err) => {
                        let _ = error_tx.try_send(SessionError::Transport(err.to_string()));
                    }
                }
            })
        }));

        let close_pty_slot = pty_slot.clone();
        dc.on_close(Box::new(move || {
            let pty_slot = close_pty_slot.clone();
            Box::pin(async move {
                if let Some(pty) = pty_slot.lock().await.as_mut() {
                    let _ = pty.kill();
                }
            })
        }));

        Box::pin(async {})
    }));
}
