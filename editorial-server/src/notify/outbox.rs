use std::path::PathBuf;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info};

use super::{Notification, Notifier, NotifyError};

type Pending = (Notification, oneshot::Sender<Result<(), NotifyError>>);

/// Appends notifications to a JSON-lines file for the external mailer.
///
/// A single background task owns the file, so lines never interleave.
/// `notify` returns once the line has been written and flushed.
#[derive(Clone)]
pub struct JsonlOutbox {
    sender: mpsc::UnboundedSender<Pending>,
}

impl JsonlOutbox {
    pub fn new(path: PathBuf) -> Self {
        let (sender, mut receiver) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            if let Err(e) = Self::writer_task(path, &mut receiver).await {
                error!("Notification outbox failed: {}", e);
            }
        });

        Self { sender }
    }

    async fn writer_task(
        path: PathBuf,
        receiver: &mut mpsc::UnboundedReceiver<Pending>,
    ) -> Result<(), NotifyError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;

        info!("Writing notifications to: {:?}", path);

        while let Some((notification, done)) = receiver.recv().await {
            let written = match serde_json::to_string(&notification) {
                Ok(line) => match file.write_all(format!("{}\n", line).as_bytes()).await {
                    Ok(()) => file.flush().await.map_err(NotifyError::from),
                    Err(e) => Err(e.into()),
                },
                Err(e) => Err(e.into()),
            };
            // The caller may have given up waiting; the line is written either way.
            let _ = done.send(written);
        }

        info!("Notification outbox shutting down");
        Ok(())
    }
}

#[async_trait]
impl Notifier for JsonlOutbox {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        let (done, written) = oneshot::channel();
        self.sender
            .send((notification, done))
            .map_err(|_| NotifyError::Closed)?;
        written.await.map_err(|_| NotifyError::Closed)?
    }
}
