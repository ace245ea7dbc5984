use std::io::Write;

use chorus::{
    cli::{Action, Command},
    config::{StorageConfig, init_logger, resolve_path},
    models::ExportFormat,
    pipeline::{ResponsePipeline, TurnEvent, TurnReply, TurnRequest, TurnStream},
    storage::new_storage,
};
use clap::CommandFactory;
use eyre::{Context, Result};
use futures::StreamExt;

#[tokio::main]
async fn main() -> Result<()> {
    let cmd = Command::new();
    if cmd.version() {
        cmd.print_version();
        return Ok(());
    }

    better_panic::Settings::auto().install();

    let mut config = cmd.get_config()?;
    init_logger(&config.log)?;
    log::debug!("Logger initialized");

    let Some(action) = cmd.action().cloned() else {
        Command::command().print_help()?;
        return Ok(());
    };

    let StorageConfig::Sqlite(sqlite) = &mut config.storage;
    if let Some(path) = sqlite.path.clone() {
        sqlite.path = Some(resolve_path(&path)?);
    }

    let storage = new_storage(&config.storage)
        .await
        .wrap_err("initializing storage")?;
    log::debug!("Storage initialized");

    let pipeline = ResponsePipeline::new(config.chat, storage).await;
    run(&pipeline, action).await
}

async fn run(pipeline: &ResponsePipeline, action: Action) -> Result<()> {
    match action {
        Action::Send {
            message,
            conversation,
            stream,
        } => {
            let mut req = TurnRequest::new(message).with_stream(stream);
            if let Some(id) = conversation {
                req = req.with_conversation_id(id);
            }
            match pipeline.send_turn(req).await.wrap_err("sending message")? {
                TurnReply::Complete(res) => {
                    println!("{}", res.response());
                    eprintln!("conversation: {}", res.conversation_id);
                }
                TurnReply::Stream(stream) => print_stream(stream).await?,
            }
        }
        Action::New { title } => {
            let conversation = pipeline
                .create_conversation(title.as_deref())
                .await
                .wrap_err("creating conversation")?;
            println!("{}", conversation.id());
        }
        Action::List => {
            let conversations = pipeline
                .list_conversations()
                .await
                .wrap_err("listing conversations")?;
            for conversation in conversations {
                println!(
                    "{}\t{}\t{}/{}\t{}",
                    conversation.id(),
                    conversation.updated_at().format("%Y-%m-%d %H:%M:%S"),
                    conversation.provider(),
                    conversation.model(),
                    conversation.title()
                );
            }
        }
        Action::History { id } => {
            let messages = pipeline
                .history(&id)
                .await
                .wrap_err(format!("getting history of {}", id))?;
            for message in messages {
                println!("{}: {}\n", message.role().label(), message.content());
            }
        }
        Action::Delete { id } => {
            pipeline
                .delete_conversation(&id)
                .await
                .wrap_err(format!("deleting {}", id))?;
            println!("Deleted {}", id);
        }
        Action::Export { id, format } => {
            let format: ExportFormat = format.parse()?;
            let exported = pipeline
                .export_conversation(&id, format)
                .await
                .wrap_err(format!("exporting {}", id))?;
            println!("{}", exported);
        }
        Action::Models => {
            for (provider, models) in pipeline.available_models().await {
                println!("{}:", provider);
                for model in models {
                    println!("  {}", model);
                }
            }
        }
        Action::Status => {
            println!("{}", serde_json::to_string_pretty(&pipeline.status())?);
        }
    }
    Ok(())
}

/// Prints fragments as they arrive. Ctrl-C stops the turn and keeps what was
/// received so far.
async fn print_stream(mut stream: TurnStream) -> Result<()> {
    let conversation_id = stream.conversation_id().to_string();
    let mut stdout = std::io::stdout();

    loop {
        let event = tokio::select! {
            _ = tokio::signal::ctrl_c() => None,
            event = stream.next() => Some(event),
        };

        match event {
            Some(Some(TurnEvent::Fragment(text) | TurnEvent::Failed(text))) => {
                print!("{}", text);
                stdout.flush()?;
            }
            Some(Some(TurnEvent::End(_)) | None) => break,
            None => {
                stream.interrupt().await.wrap_err("interrupting reply")?;
                println!();
                eprintln!("interrupted, conversation: {}", conversation_id);
                return Ok(());
            }
        }
    }

    println!();
    eprintln!("conversation: {}", conversation_id);
    Ok(())
}
