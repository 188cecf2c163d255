//! Test helpers: a sink that turns callbacks back into commands on a channel.

use std::sync::Arc;
use std::time::Duration;

use chit_core::{Command, MessageSink, ReceivedMessage};
use tokio::sync::mpsc;

pub struct ChannelSink(mpsc::UnboundedSender<Command>);

impl ChannelSink {
    pub fn new() -> (Arc<dyn MessageSink>, mpsc::UnboundedReceiver<Command>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Arc::new(ChannelSink(tx)), rx)
    }
}

impl MessageSink for ChannelSink {
    fn on_message_received(&self, m: ReceivedMessage) {
        let cmd = match m.unique_id {
            Some(unique_id) => Command::IdentifiedMessage {
                unique_id,
                text: m.text,
            },
            None => Command::PlainMessage {
                sender: m.sender,
                text: m.text,
            },
        };
        let _ = self.0.send(cmd);
    }
    fn on_message_liked(&self, unique_id: &str, liked: bool) {
        let _ = self.0.send(Command::Like {
            unique_id: unique_id.into(),
            liked,
        });
    }
    fn on_message_edited(&self, unique_id: &str, new_text: &str) {
        let _ = self.0.send(Command::Edit {
            unique_id: unique_id.into(),
            new_text: new_text.into(),
        });
    }
    fn on_message_deleted(&self, unique_id: &str) {
        let _ = self.0.send(Command::Delete {
            unique_id: unique_id.into(),
        });
    }
    fn on_image_received(&self, unique_id: &str, caption: &str, payload: &str) {
        let _ = self.0.send(Command::Image {
            unique_id: unique_id.into(),
            caption: caption.into(),
            payload: payload.into(),
        });
    }
    fn on_document_received(&self, unique_id: &str, file_name: &str, file_size: u64, payload: &str) {
        let _ = self.0.send(Command::Document {
            unique_id: unique_id.into(),
            file_name: file_name.into(),
            file_size,
            payload: payload.into(),
        });
    }
}

/// Next delivered command, failing the test after 5s.
pub async fn next_event(rx: &mut mpsc::UnboundedReceiver<Command>) -> Command {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("sink channel closed")
}

/// Skip events until one matches `pred`.
pub async fn wait_for(
    rx: &mut mpsc::UnboundedReceiver<Command>,
    pred: impl Fn(&Command) -> bool,
) -> Command {
    loop {
        let cmd = next_event(rx).await;
        if pred(&cmd) {
            return cmd;
        }
    }
}
