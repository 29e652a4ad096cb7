//! `oscine dump`: serve and print everything that arrives

use anyhow::Result;
use colored::Colorize;
use oscine_core::{Atom, Message};
use oscine_server::{Dispatcher, Server, ServerConfig};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::output::format_message;
use crate::Protocol;

pub struct DumpOptions {
    pub addr: String,
    pub protocol: Protocol,
    pub patterns: Vec<String>,
    pub echo: bool,
}

/// Build the printing dispatcher: listed patterns only, or everything
fn printer(patterns: &[String], echo: bool) -> Result<Arc<Dispatcher>> {
    let dispatcher = Arc::new(Dispatcher::new());
    let print = move |address: &str, _: &[Atom], args: &[Atom]| -> anyhow::Result<Option<Message>> {
        println!("{}", format_message(address, args));
        if echo {
            Ok(Some(Message::new(address, args.to_vec())?))
        } else {
            Ok(None)
        }
    };

    if patterns.is_empty() {
        dispatcher.set_default_handler(print);
    } else {
        for pattern in patterns {
            dispatcher.map(pattern, print, vec![])?;
        }
    }
    Ok(dispatcher)
}

pub async fn run_dump(
    options: DumpOptions,
    config: ServerConfig,
    shutdown_rx: &mut mpsc::Receiver<()>,
) -> Result<()> {
    let dispatcher = printer(&options.patterns, options.echo)?;
    let policy = config.policy;
    let server = Arc::new(Server::new(dispatcher, config)?);

    println!(
        "{} Listening for OSC on {} ({}, {} policy)",
        "OK".green().bold(),
        options.addr,
        options.protocol,
        policy
    );
    println!("  Press Ctrl+C to stop");

    let mut serving = {
        let server = server.clone();
        let addr = options.addr.clone();
        let protocol = options.protocol;
        tokio::spawn(async move {
            match protocol {
                Protocol::Udp => server.serve_udp(&addr).await,
                Protocol::Tcp => server.serve_tcp(&addr).await,
            }
        })
    };

    tokio::select! {
        _ = shutdown_rx.recv() => {
            info!("Dump server shutting down");
            server.shutdown().await;
            serving.await??;
        }
        result = &mut serving => result??,
    }

    println!("{}", "Server stopped".yellow());
    Ok(())
}
