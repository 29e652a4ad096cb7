//! `oscine send`: send one message and optionally wait for a reply

use anyhow::{Context, Result};
use colored::Colorize;
use oscine_core::{Bundle, Message, Packet, Timestamp};
use oscine_transport::{Framing, TcpClient, TcpConfig, TransportError, UdpClient};
use std::time::{Duration, SystemTime};

use crate::args::parse_atoms;
use crate::output::print_packet;
use crate::Protocol;

pub struct SendOptions {
    pub target: String,
    pub protocol: Protocol,
    pub framing: Framing,
    pub address: String,
    pub args: Vec<String>,
    /// Wrap in a bundle due this far in the future
    pub delay: Option<Duration>,
    pub broadcast: bool,
    /// How long to wait for a reply
    pub wait: Option<Duration>,
}

pub fn build_packet(address: &str, args: &[String], delay: Option<Duration>) -> Result<Packet> {
    let message = Message::new(address, parse_atoms(args)?)
        .with_context(|| format!("Invalid address {:?}", address))?;

    Ok(match delay {
        Some(delay) => {
            let due = Timestamp::from_system_time(SystemTime::now() + delay);
            Packet::Bundle(Bundle::builder(due).message(message).build())
        }
        None => Packet::Message(message),
    })
}

pub async fn run_send(options: SendOptions) -> Result<()> {
    let packet = build_packet(&options.address, &options.args, options.delay)?;

    let reply = match options.protocol {
        Protocol::Udp => {
            let client = UdpClient::connect(&options.target).await?;
            if options.broadcast {
                client.set_broadcast(true)?;
            }
            client.send(&packet).await?;
            print_sent(&options.target, &packet);

            match options.wait {
                Some(wait) => client.recv(wait).await?,
                None => return Ok(()),
            }
        }
        Protocol::Tcp => {
            let config = TcpConfig {
                framing: options.framing,
                ..Default::default()
            };
            let mut client = TcpClient::connect_with_config(&options.target, config).await?;
            client.send(&packet).await?;
            print_sent(&options.target, &packet);

            let reply = match options.wait {
                Some(wait) => match client.recv_timeout(wait).await {
                    Ok(reply) => reply,
                    Err(TransportError::Timeout) => None,
                    Err(e) => return Err(e.into()),
                },
                None => None,
            };
            client.close().await?;
            if options.wait.is_none() {
                return Ok(());
            }
            reply
        }
    };

    match reply {
        Some(packet) => print_packet(&packet),
        None => println!("{}", "No reply".yellow()),
    }
    Ok(())
}

fn print_sent(target: &str, packet: &Packet) {
    println!("{} {} bytes to {}", "Sent".green().bold(), packet.encoded_len(), target);
}

#[cfg(test)]
mod tests {
    use super::*;
    use oscine_core::Atom;

    #[test]
    fn test_build_message() {
        let packet = build_packet("/synth/freq", &["f:440".to_string()], None).unwrap();
        let message = packet.as_message().unwrap();
        assert_eq!(message.address(), "/synth/freq");
        assert_eq!(message.args(), &[Atom::Float(440.0)]);
    }

    #[test]
    fn test_build_delayed_bundle() {
        let packet = build_packet("/go", &[], Some(Duration::from_secs(5))).unwrap();
        let bundle = packet.as_bundle().unwrap();
        assert_eq!(bundle.len(), 1);
        assert!(bundle.timestamp > Timestamp::now());
    }

    #[test]
    fn test_wildcard_target_is_rejected() {
        let err = build_packet("/synth/*", &[], None).unwrap_err();
        assert!(err.to_string().contains("/synth/*"));
    }
}
