use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::dom::TEXT_SEPARATOR;
use crate::text::diff_line;

use super::client::{normalize_batch, Converter};
use super::error::{ConversionError, ConversionResult};
use super::messages::{ConvertReply, HostMessage};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_error, log_info, log_warn};

/// In-flight requests the channel buffers before senders wait.
const REQUEST_BUFFER: usize = 16;

/// One message for the background side plus where to send the answer.
pub struct ConvertRequest {
    pub message: HostMessage,
    pub reply: oneshot::Sender<ConvertReply>,
}

/// Owns the background task that performs conversions.
pub struct BackgroundService {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
    sender: mpsc::Sender<ConvertRequest>,
}

impl BackgroundService {
    pub fn start<C>(converter: C) -> Self
    where
        C: Converter + Send + Sync + 'static,
    {
        let (sender, requests) = mpsc::channel(REQUEST_BUFFER);
        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(background_loop(converter, requests, cancel_token.clone()));

        Self {
            handle: Some(handle),
            cancel_token: Some(cancel_token),
            sender,
        }
    }

    /// Content-side end of the channel.
    pub fn converter(&self) -> ChannelConverter {
        ChannelConverter {
            tx: self.sender.clone(),
        }
    }

    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("background task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

pub async fn background_loop<C: Converter>(
    converter: C,
    mut requests: mpsc::Receiver<ConvertRequest>,
    cancel_token: CancellationToken,
) {
    loop {
        tokio::select! {
            request = requests.recv() => {
                let Some(request) = request else {
                    log_info!("all content senders dropped; background loop exiting");
                    break;
                };
                tokio::select! {
                    _ = handle_request(&converter, request) => {}
                    _ = cancel_token.cancelled() => {
                        log_info!("background loop cancelled mid-request");
                        break;
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("background loop shutting down");
                break;
            }
        }
    }
}

async fn handle_request<C: Converter>(converter: &C, request: ConvertRequest) {
    let ConvertRequest { message, reply } = request;

    let result = match message {
        HostMessage::ConvertText { text } => {
            let result = converter.convert(&text).await;
            match &result {
                Ok(converted) => log_differences(&normalize_batch(&text), converted),
                Err(err) => log_error!("conversion failed: {err}"),
            }
            result
        }
        other => {
            log_warn!("background got unexpected message {other:?}");
            Err(ConversionError::Rejected("unsupported action".into()))
        }
    };

    if reply.send(ConvertReply::from(result)).is_err() {
        log_debug!("content side went away before the reply");
    }
}

/// Debug trace of which words changed on each segment.
fn log_differences(original: &str, converted: &str) {
    let original_lines = original.split(TEXT_SEPARATOR);
    let mut converted_lines = converted.split(TEXT_SEPARATOR);

    for (idx, original_line) in original_lines.enumerate() {
        let Some(converted_line) = converted_lines.next() else {
            break;
        };
        if original_line == converted_line {
            continue;
        }
        for entry in diff_line(original_line, converted_line) {
            log_debug!("segment {idx}: {} -> {}", entry.original, entry.replacement);
        }
    }
}

/// Converter that forwards to the background service over the channel.
#[derive(Clone)]
pub struct ChannelConverter {
    tx: mpsc::Sender<ConvertRequest>,
}

impl Converter for ChannelConverter {
    async fn convert(&self, text: &str) -> ConversionResult<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = ConvertRequest {
            message: HostMessage::ConvertText {
                text: text.to_string(),
            },
            reply: reply_tx,
        };

        self.tx
            .send(request)
            .await
            .map_err(|_| ConversionError::ChannelInvalidated)?;

        reply_rx
            .await
            .map_err(|_| ConversionError::ChannelInvalidated)?
            .into_result()
    }
}
