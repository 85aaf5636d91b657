use anyhow::{Context, Result, anyhow};
use seekchat_application::{ChatCollection, ConversationManager};
use seekchat_core::conversation::{ConversationEvent, Role};
use seekchat_core::error::Result as ChatResult;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::broadcast::{Receiver, error::RecvError};
use tokio::task::JoinHandle;

async fn resolve(collection: &ChatCollection, key: Option<i64>) -> Result<Arc<ConversationManager>> {
    match key {
        Some(key) => collection
            .get(key)
            .await
            .ok_or_else(|| anyhow!("No conversation with key {}", key)),
        None => collection
            .current()
            .await
            .context("No conversation selected"),
    }
}

pub async fn list(collection: &ChatCollection) -> Result<()> {
    let current = collection.current_key().await;
    for chat in collection.chats().await {
        let marker = if Some(chat.key()) == current { "*" } else { " " };
        println!(
            "{} {}  {}  ({} messages)",
            marker,
            chat.key(),
            chat.label().await,
            chat.active_path().await.len()
        );
    }
    Ok(())
}

pub async fn show(collection: &ChatCollection, key: Option<i64>) -> Result<()> {
    let chat = resolve(collection, key).await?;
    println!("# {}", chat.label().await);
    for message in chat.active_path().await {
        let siblings = chat.group_siblings(message.key).await;
        let alternates = if siblings.len() > 1 {
            let position = siblings
                .iter()
                .rev()
                .position(|m| m.key == message.key)
                .map_or(0, |i| i + 1);
            format!(" [{}/{}]", position, siblings.len())
        } else {
            String::new()
        };
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        };
        let mark = if message.is_marked() { " ★" } else { "" };
        println!("\n## {} ({}){}{}", role, message.key, alternates, mark);
        if !message.reasoning_content.is_empty() {
            for line in message.reasoning_content.lines() {
                println!("> {}", line);
            }
            println!();
        }
        println!("{}", message.content);
    }
    Ok(())
}

pub async fn new_chat(collection: &ChatCollection) -> Result<()> {
    let chat = collection.add_chat().await;
    println!("Created conversation {}", chat.key());
    Ok(())
}

pub async fn remove(collection: &ChatCollection, key: i64) -> Result<()> {
    if !collection.remove_chat(key).await {
        return Err(anyhow!("No conversation with key {}", key));
    }
    println!("Removed conversation {}", key);
    Ok(())
}

pub async fn select(collection: &ChatCollection, key: i64) -> Result<()> {
    if !collection.select(Some(key)).await {
        return Err(anyhow!("No conversation with key {}", key));
    }
    Ok(())
}

pub async fn send(
    collection: &ChatCollection,
    key: Option<i64>,
    message: &str,
    reasoning: Option<bool>,
    show_reasoning: bool,
) -> Result<()> {
    let chat = resolve(collection, key).await?;
    if let Some(reasoning) = reasoning {
        if chat.open_reasoning().await != reasoning {
            chat.set_open_reasoning(reasoning).await;
        }
    }
    chat.set_input_text(message).await;

    let events = chat.subscribe();
    let Some(handle) = chat.send().await else {
        println!("Nothing to send");
        return Ok(());
    };
    let answer = follow(&chat, events, handle).await?;
    if show_reasoning {
        if let Some(key) = answer {
            let message = chat.message(key).await;
            if let Some(message) = message.filter(|m| !m.reasoning_content.is_empty()) {
                eprintln!("\n--- reasoning ---\n{}", message.reasoning_content);
            }
        }
    }
    Ok(())
}

pub async fn regenerate(collection: &ChatCollection, chat: Option<i64>, key: i64) -> Result<()> {
    let chat = resolve(collection, chat).await?;
    let events = chat.subscribe();
    let handle = chat
        .refresh(key)
        .await
        .ok_or_else(|| anyhow!("Message {} is not on the active path", key))?;
    follow(&chat, events, handle).await?;
    Ok(())
}

pub async fn switch(collection: &ChatCollection, chat: Option<i64>, key: i64) -> Result<()> {
    let chat = resolve(collection, chat).await?;
    if !chat.switch_to_message(key).await {
        return Err(anyhow!("No message with key {}", key));
    }
    show(collection, Some(chat.key())).await
}

/// Prints the streamed answer as it grows until the fetch task ends.
///
/// Ctrl-C stops the stream, which deletes the partial answer.
async fn follow(
    chat: &Arc<ConversationManager>,
    mut events: Receiver<ConversationEvent>,
    mut handle: JoinHandle<ChatResult<()>>,
) -> Result<Option<i64>> {
    let mut streaming = None;
    let mut printed = 0;
    let mut stdout = std::io::stdout();

    loop {
        tokio::select! {
            result = &mut handle => {
                result.context("Answer task panicked")??;
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                if let Some(key) = streaming {
                    chat.stop(key).await;
                    eprintln!("\n(stopped)");
                }
            }
            event = events.recv() => match event {
                Ok(ConversationEvent::StreamStarted { key, .. }) => streaming = Some(key),
                Ok(ConversationEvent::StreamRetry { attempt, .. }) => {
                    eprintln!("\n(stream stalled, retry {})", attempt);
                }
                Ok(ConversationEvent::ScrollToBottom { follow: true, .. }) => {
                    if let Some(message) = match streaming {
                        Some(key) => chat.message(key).await,
                        None => None,
                    } {
                        if let Some(fresh) = message.content.get(printed..) {
                            print!("{}", fresh);
                            stdout.flush()?;
                            printed = message.content.len();
                        }
                    }
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => {
                    (&mut handle).await.context("Answer task panicked")??;
                    break;
                }
            }
        }
    }

    // Flush whatever arrived after the last event we saw.
    while let Ok(event) = events.try_recv() {
        if let ConversationEvent::StreamStarted { key, .. } = event {
            streaming.get_or_insert(key);
        }
    }
    if let Some(key) = streaming {
        if let Some(message) = chat.message(key).await {
            if let Some(fresh) = message.content.get(printed..) {
                print!("{}", fresh);
            }
        }
    }
    println!();
    Ok(streaming)
}
