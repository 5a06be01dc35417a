//! Command-line surface.
//!
//! Absence of `offer_url` selects host mode; its presence selects
//! guest mode. Env var fallbacks mirror the defaults a deployment
//! would otherwise have to pass as flags every time.

use clap::Parser;

const DEFAULT_STUN: &str = "stun:stun.l.google.com:19302";
const DEFAULT_SDP_SERVER: &str = "https://pair-server-sw.herokuapp.com";
const DEFAULT_SESSION: &str = "pair";

#[derive(Debug, Parser)]
#[command(name = "pair", about = "Pair a remote terminal over WebRTC")]
pub struct Cli {
    /// Verbose logging to stderr.
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    /// STUN server used for ICE.
    #[arg(short = 's', long = "stun", default_value_t = stun_default())]
    pub stun_server: String,

    /// Rendezvous server base URL.
    #[arg(long = "sdp", default_value_t = sdp_server_default())]
    pub sdp_server: String,

    /// Named terminal-multiplexer session to host or attach to.
    #[arg(long = "session", default_value_t = DEFAULT_SESSION.to_string())]
    pub session: String,

    /// Print the version and exit.
    #[arg(long = "version")]
    pub version: bool,

    /// Offer URL to join as a guest; omit to host.
    pub offer_url: Option<String>,
}

fn stun_default() -> String {
    std::env::var("PAIR_STUN_SERVER").unwrap_or_else(|_| DEFAULT_STUN.to_string())
}

fn sdp_server_default() -> String {
    std::env::var("PAIR_SDP_SERVER").unwrap_or_else(|_| DEFAULT_SDP_SERVER.to_string())
}

impl Cli {
    pub fn is_guest(&self) -> bool {
        self.offer_url.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_mode_has_no_offer_url() {
        let cli = Cli::parse_from(["pair"]);
        assert!(!cli.is_guest());
        assert_eq!(cli.session, DEFAULT_SESSION);
    }

    #[test]
    fn guest_mode_takes_positional_offer_url() {
        let cli = Cli::parse_from(["pair", "https://example.test/p/abc"]);
        assert!(cli.is_guest());
        assert_eq!(cli.offer_url.as_deref(), Some("https://example.test/p/abc"));
    }

    #[test]
    fn flags_override_env_defaults() {
        let cli = Cli::parse_from(["pair", "-s", "stun:example.test:3478"]);
        assert_eq!(cli.stun_server, "stun:example.test:3478");
    }
}
