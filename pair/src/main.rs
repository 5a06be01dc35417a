mod cli;
mod control;
mod mux;
mod pty;
mod session;
mod signaling;
mod terminal;

use clap::Parser;
use cli::Cli;
use mux::Tmux;
use session::{guest, host, SessionError};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.version {
        println!("pair {VERSION}");
        return;
    }

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(err) = run(cli).await {
        eprintln!("pair: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), SessionError> {
    let mux = Tmux;
    let (error_tx, error_rx) = session::error_bus();
    install_sigint_handler(error_tx.clone());

    if let Some(offer_url) = cli.offer_url.clone() {
        guest::run(
            &mux,
            guest::GuestOptions {
                stun_server: cli.stun_server,
                offer_url,
            },
            error_tx,
            error_rx,
        )
        .await
    } else {
        host::run(
            &mux,
            host::HostOptions {
                stun_server: cli.stun_server,
                sdp_server: cli.sdp_server,
                session_name: cli.session,
            },
            error_tx,
            error_rx,
        )
        .await
    }
}

/// SIGINT/SIGTERM post onto the same error bus the data-channel
/// callbacks use, so the run loop unwinds through the normal error
/// path and its RAII guards (raw mode, PTY) still run instead of the
/// process exiting mid-raw-mode.
fn install_sigint_handler(error_tx: session::ErrorBus) {
    let ctrlc_tx = error_tx.clone();
    let _ = ctrlc::set_handler(move || {
        log::info!("received SIGINT");
        let _ = ctrlc_tx.try_send(SessionError::Transport("interrupted".into()));
    });

    if let Ok(mut signals) = signal_hook::iterator::Signals::new([signal_hook::consts::SIGTERM]) {
        std::thread::spawn(move || {
            if signals.forever().next().is_some() {
                log::info!("received SIGTERM");
                let _ = error_tx.try_send(SessionError::Transport("terminated".into()));
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mux::FakeMultiplexer;

    #[tokio::test]
    async fn host_flow_refuses_outside_multiplexer() {
        let mux = FakeMultiplexer::default();
        let (error_tx, error_rx) = session::error_bus();
        let err = host::run(
            &mux,
            host::HostOptions {
                stun_server: "stun:stun.l.google.com:19302".to_string(),
                sdp_server: "https://example.test".to_string(),
                session_name: "pair".to_string(),
            },
            error_tx,
            error_rx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::NotInMultiplexerSession));
    }

    #[tokio::test]
    async fn guest_flow_refuses_inside_multiplexer() {
        let mux = FakeMultiplexer {
            within_session: true,
            ..Default::default()
        };
        let (error_tx, error_rx) = session::error_bus();
        let err = guest::run(
            &mux,
            guest::GuestOptions {
                stun_server: "stun:stun.l.google.com:19302".to_string(),
                offer_url: "https://example.test/p/abc".to_string(),
            },
            error_tx,
            error_rx,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyInSession));
    }
}
