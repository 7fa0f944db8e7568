use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use realtime_core::{
    http::HttpTranscriptLoader, ConversationKey, RealtimeService, StaticSession,
};
use shared::domain::UserId;
use tokio::sync::broadcast::error::RecvError;
use tracing::warn;

/// Realtime console: connects the websocket, tails every event topic, and
/// optionally sends one direct message on startup.
#[derive(Parser, Debug)]
struct Args {
    #[arg(long)]
    api_base: String,
    #[arg(long)]
    session_token: String,
    #[arg(long)]
    user_id: i64,
    /// Send one direct message to this user after connecting.
    #[arg(long)]
    send_to: Option<i64>,
    #[arg(long, default_value = "hello from the console")]
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().init();
    let args = Args::parse();

    let session = Arc::new(StaticSession {
        token: args.session_token,
        user_id: UserId(args.user_id),
    });
    let loader = Arc::new(HttpTranscriptLoader::new(&args.api_base, session.clone()));
    let service = RealtimeService::new(&args.api_base, session, loader)?;

    let mut direct = service.subscribe_direct_messages();
    let mut group = service.subscribe_group_messages();
    let mut notifications = service.subscribe_notifications();

    service.connect().await;
    println!("Connecting to {} ...", args.api_base);

    if let Some(peer) = args.send_to {
        let peer = UserId(peer);
        let outcome = service.chat().submit_direct(peer, &args.message).await?;
        println!("Sent to user {}: {outcome:?}", peer.0);
        for entry in service.chat().transcript(ConversationKey::Direct(peer)).await {
            println!("  [{}] {}: {}", entry.sent_at_formatted, entry.sender_name, entry.content);
        }
    }

    loop {
        tokio::select! {
            event = direct.recv() => match event {
                Ok(event) => println!(
                    "[dm] user {} -> user {} at {}: {}",
                    event.sender_id.0, event.receiver_id.0, event.sent_at, event.message
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "direct topic lagged"),
                Err(RecvError::Closed) => break,
            },
            event = group.recv() => match event {
                Ok(event) => println!(
                    "[group {}] user {} at {}: {}",
                    event.group_id.0, event.sender_id.0, event.sent_at, event.message
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "group topic lagged"),
                Err(RecvError::Closed) => break,
            },
            event = notifications.recv() => match event {
                Ok(event) => println!(
                    "[notification {}] {} (read: {}) payload: {}",
                    event.id.0,
                    event.kind,
                    event.is_read,
                    serde_json::to_string(&event.payload)?
                ),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "notification topic lagged"),
                Err(RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                println!(
                    "Shutting down ({} users online, {} unread notifications).",
                    service.presence().online_count(),
                    service.notifications().unread_count()
                );
                service.close().await;
                break;
            }
        }
    }

    Ok(())
}
