use anyhow::Result;
use seekchat_application::ChatCollection;
use std::path::Path;

pub async fn export(
    collection: &ChatCollection,
    mut keys: Vec<i64>,
    output: &Path,
    isolate: bool,
) -> Result<()> {
    if keys.is_empty() {
        for chat in collection.chats().await {
            keys.push(chat.key());
        }
    }
    let path = collection.export_html(&keys, output, isolate).await?;
    println!("Exported {} conversations to {}", keys.len(), path.display());
    Ok(())
}

pub async fn import(collection: &ChatCollection, path: &Path) -> Result<()> {
    let count = collection.import_html(path).await?;
    println!("Imported {} conversations", count);
    for chat in collection.chats().await {
        if chat.is_new().await {
            println!("  * {} {}", chat.key(), chat.label().await);
        }
    }
    Ok(())
}
