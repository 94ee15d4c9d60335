//! A terminal PeerLink endpoint over WebRTC.
//!
//! Environment:
//! - `PEERLINK_URL`: coordinator URL, default `ws://127.0.0.1:8080`
//! - `PEERLINK_ID`: local id, random if unset
//! - `PEERLINK_NAME`: display name
//! - `PEERLINK_PASSPHRASE`: network passphrase, the built-in default if unset
//! - `PEERLINK_LOCAL_ONLY`: set to `1` to skip STUN (same host or LAN)
//!
//! Commands, one per line:
//!
//! ```text
//! /msg <id> <text>   private message, direct when connected
//! /info <id>         ask the coordinator about a peer
//! /peers             list peers with an open channel
//! /quit
//! <text>             public post to everyone
//! ```

use peerlink::prelude::*;
use tokio::io::{AsyncBufReadExt, BufReader};

const DEFAULT_URL: &str = "ws://127.0.0.1:8080";

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, Eq)]
enum Command {
    Msg { to: PeerId, text: String },
    Info { id: PeerId },
    Peers,
    Quit,
    Post { text: String },
}

fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Post {
            text: line.to_string(),
        }));
    };

    let (verb, args) = rest.split_once(' ').unwrap_or((rest, ""));
    let args = args.trim();
    match verb {
        "msg" => match args.split_once(' ') {
            Some((to, text)) if !text.trim().is_empty() => Ok(Some(Command::Msg {
                to: PeerId::from(to),
                text: text.trim().to_string(),
            })),
            _ => Err("usage: /msg <id> <text>".into()),
        },
        "info" if !args.is_empty() => Ok(Some(Command::Info {
            id: PeerId::from(args),
        })),
        "info" => Err("usage: /info <id>".into()),
        "peers" => Ok(Some(Command::Peers)),
        "quit" => Ok(Some(Command::Quit)),
        other => Err(format!("unknown command: /{other}")),
    }
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn render(event: &PeerEvent) -> String {
    match event {
        PeerEvent::Discovered { id, display_name } => format!("* {display_name} ({id}) is online"),
        PeerEvent::Connected { id } => format!("* direct channel to {id} open"),
        PeerEvent::Disconnected { id } => format!("* direct channel to {id} lost"),
        PeerEvent::Left { id } => format!("* {id} left"),
        PeerEvent::MessageReceived {
            from,
            content,
            via,
            security,
        } => {
            let via = match via {
                Via::Direct => "direct",
                Via::Relay => "relay",
            };
            format!("[{from} via {via}{}] {content}", flag(*security))
        }
        PeerEvent::PublicPost {
            from,
            content,
            security,
            ..
        } => format!("<{from}{}> {content}", flag(*security)),
        PeerEvent::DeliveryFailed { to, reason } => format!("! could not deliver to {to}: {reason}"),
        PeerEvent::PeerInfo {
            id,
            display_name,
            online,
        } => {
            let name = display_name.as_deref().unwrap_or("?");
            let status = if *online { "online" } else { "offline" };
            format!("* {id} ({name}) is {status}")
        }
        PeerEvent::SignalingError { message } => format!("! coordinator: {message}"),
        PeerEvent::CoordinatorLost => "! lost the coordinator".to_string(),
    }
}

fn flag(security: Security) -> &'static str {
    match security {
        Security::Encrypted => "",
        Security::Plaintext => ", unencrypted",
        Security::Undecryptable => ", undecryptable",
    }
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), PeerlinkError> {
    peerlink::telemetry::init_with("warn");

    let env = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());
    let url = env("PEERLINK_URL").unwrap_or_else(|| DEFAULT_URL.to_string());
    let webrtc = if env("PEERLINK_LOCAL_ONLY").as_deref() == Some("1") {
        WebRtcConfig::local_only()
    } else {
        WebRtcConfig::default()
    };

    let mut builder = Endpoint::builder(WebRtcFactory::new(webrtc))
        .local_id(env("PEERLINK_ID").map(PeerId::from).unwrap_or_else(generate_peer_id));
    if let Some(name) = env("PEERLINK_NAME") {
        builder = builder.display_name(name);
    }
    if let Some(passphrase) = env("PEERLINK_PASSPHRASE") {
        builder = builder.passphrase(passphrase);
    }

    let (handle, mut events) = builder.build()?.connect(&url).await?;
    println!("* connected to {url} as {}", handle.local_id());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                println!("{}", render(&event));
            }
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                match parse_command(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => run(&handle, command).await?,
                    Ok(None) => {}
                    Err(usage) => println!("! {usage}"),
                }
            }
        }
    }

    handle.stop().await.ok();
    Ok(())
}

async fn run(handle: &EndpointHandle, command: Command) -> Result<(), PeerlinkError> {
    match command {
        Command::Msg { to, text } => {
            if handle.send(to.clone(), text).await? == SendResult::Relayed {
                println!("* {to}: no direct channel, sent through the coordinator");
            }
        }
        Command::Info { id } => handle.request_peer_info(id).await?,
        Command::Peers => {
            let peers = handle.connected_peers().await;
            if peers.is_empty() {
                println!("* no direct channels");
            }
            for id in peers {
                println!("* {id}");
            }
        }
        Command::Post { text } => handle.broadcast(text).await?,
        Command::Quit => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_post() {
        assert_eq!(
            parse_command("hello all").unwrap(),
            Some(Command::Post {
                text: "hello all".into()
            })
        );
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn test_msg_keeps_spaces_in_text() {
        assert_eq!(
            parse_command("/msg b2 see you at noon").unwrap(),
            Some(Command::Msg {
                to: PeerId::from("b2"),
                text: "see you at noon".into()
            })
        );
    }

    #[test]
    fn test_bad_commands_report_usage() {
        assert!(parse_command("/msg b2").unwrap_err().contains("usage"));
        assert!(parse_command("/info").unwrap_err().contains("usage"));
        assert!(parse_command("/dance").unwrap_err().contains("unknown"));
    }

    #[test]
    fn test_render_flags_insecure_messages() {
        let event = PeerEvent::MessageReceived {
            from: PeerId::from("a1"),
            content: "hi".into(),
            via: Via::Relay,
            security: Security::Undecryptable,
        };
        assert_eq!(render(&event), "[a1 via relay, undecryptable] hi");
    }
}
