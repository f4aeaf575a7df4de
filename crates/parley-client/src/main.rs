//! `parley`: terminal front-end for the support chat.
//!
//! Reads its configuration and identity from the environment, connects to
//! the hub and turns stdin lines into chat commands.

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing::{info, warn};

use parley_client::cli::{self, Command};
use parley_client::{ChatConfig, ChatEvent, ChatSession, MessageStore, SessionIdentity};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing and configuration
    // -----------------------------------------------------------------------
    parley_client::init_tracing();
    info!("Starting parley v{}", env!("CARGO_PKG_VERSION"));

    let config = ChatConfig::from_env();
    let identity =
        SessionIdentity::from_env().context("PARLEY_USER_ID must name the signed-in user")?;
    info!(
        api = %config.api_url,
        hub = %config.hub_url,
        authenticated = config.access_token.is_some(),
        user = %identity.user_id,
        role = ?identity.role,
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 2. Session and hub connection
    // -----------------------------------------------------------------------
    let session = ChatSession::start(&config, identity)?;
    session.connect().await?;

    let printer = tokio::spawn(print_events(
        session.store().clone(),
        session.store().subscribe(),
    ));

    println!("{}", cli::HELP);

    // -----------------------------------------------------------------------
    // 3. Input loop until /quit, end of input or Ctrl+C
    // -----------------------------------------------------------------------
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match cli::parse_line(&line) {
                    Ok(Some(Command::Quit)) => break,
                    Ok(Some(command)) => run_command(&session, command).await,
                    Ok(None) => {}
                    Err(e) => println!("{e}"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    printer.abort();
    session.dispose().await;
    Ok(())
}

async fn run_command(session: &ChatSession, command: Command) {
    let store = session.store();
    match command {
        Command::SelectPeer(peer) => {
            if let Err(e) = store.select_peer(&peer).await {
                println!("could not load conversation with {peer}: {e}");
            }
            let local = store.local_user();
            println!("--- {peer} ---");
            for message in store.messages(&peer) {
                println!("{}", cli::format_message(&message, local.as_ref()));
            }
        }
        Command::Users => match session.directory().await {
            Ok(users) => {
                for user in &users {
                    println!("{}", cli::format_user(user));
                }
            }
            Err(e) => println!("could not list users: {e}"),
        },
        Command::Unread => {
            let mut unread: Vec<_> = store.unread_messages().into_iter().collect();
            unread.sort();
            for (peer, count) in unread {
                println!("{peer}: {count}");
            }
            println!("total: {}", store.total_unread());
        }
        Command::Status => println!("{}", cli::format_status(&session.connection_status())),
        Command::Reconnect => {
            if let Err(e) = session.connect().await {
                println!("could not reconnect: {e}");
            }
        }
        Command::Retry(correlation_id) => {
            if let Err(e) = store.retry_failed(correlation_id).await {
                println!("retry failed: {e}");
            }
        }
        Command::Help => println!("{}", cli::HELP),
        Command::Send(body) => {
            let Some(peer) = store.selected_peer() else {
                println!("select a peer first with /peer <id>");
                return;
            };
            // Failures are reported through the DeliveryFailed event.
            if let Err(e) = store.send_message(&peer, &body).await {
                if e.is_validation() {
                    println!("{e}");
                }
            }
        }
        Command::Quit => {}
    }
}

async fn print_events(store: MessageStore, mut events: broadcast::Receiver<ChatEvent>) {
    loop {
        let event = match events.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Event printer lagged behind");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if let ChatEvent::MessageAppended { peer, message_id } = &event {
            let local = store.local_user();
            let incoming = store
                .messages(peer)
                .into_iter()
                .find(|m| &m.id == message_id)
                .filter(|m| Some(&m.sender_id) != local.as_ref());
            if let Some(message) = incoming {
                if store.selected_peer().as_ref() == Some(peer) {
                    println!("{}", cli::format_message(&message, local.as_ref()));
                }
            }
        }
        if let Some(line) = cli::describe_event(&event) {
            println!("{line}");
        }
    }
}
