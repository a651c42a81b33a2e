//! HTTP multipart transport

use std::time::Duration;

use bytes::Bytes;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Body, Client, RequestBuilder};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use super::{TerminalEvent, Transport, TransportEvent, TransportStream, UploadResponse};
use crate::config::UpdateConfig;
use crate::error::Result;
use crate::image::UpdateImage;
use crate::progress::ProgressTracker;

/// Uploads images as a single `multipart/form-data` POST
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    upload_url: Url,
    form_field: String,
    chunk_size: usize,
    timeout: Duration,
    auth: Option<(String, String)>,
}

impl HttpTransport {
    /// Create a transport with its own HTTP client
    pub fn from_config(config: &UpdateConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeouts.connect())
            .build()?;
        Self::with_client(client, config)
    }

    /// Create a transport sharing an existing HTTP client
    pub fn with_client(client: Client, config: &UpdateConfig) -> Result<Self> {
        let upload_url = Url::parse(&config.connection.base_url)?.join(&config.endpoints.upload)?;
        let auth = config
            .connection
            .api_key
            .as_ref()
            .map(|key| (config.connection.api_key_header.clone(), key.clone()));

        Ok(Self {
            client,
            upload_url,
            form_field: config.endpoints.form_field.clone(),
            chunk_size: config.image.chunk_size.max(1),
            timeout: config.timeouts.transfer(),
            auth,
        })
    }

    pub fn upload_url(&self) -> &Url {
        &self.upload_url
    }

    fn build_request(
        &self,
        image: &UpdateImage,
        sent_tx: mpsc::UnboundedSender<u64>,
    ) -> RequestBuilder {
        let body = chunked_body(image.data().clone(), self.chunk_size, sent_tx);
        let part = Part::stream_with_length(body, image.size()).file_name(image.name().to_string());
        let form = Form::new().part(self.form_field.clone(), part);

        let mut request = self
            .client
            .post(self.upload_url.clone())
            .timeout(self.timeout)
            .multipart(form);
        if let Some((header, key)) = &self.auth {
            request = request.header(header.as_str(), key.as_str());
        }
        request
    }
}

impl Transport for HttpTransport {
    fn send(&self, image: UpdateImage, cancel: CancellationToken) -> TransportStream {
        let (tx, rx) = mpsc::channel(64);
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();

        info!(
            "Uploading {} ({} bytes) to {}",
            image.name(),
            image.size(),
            self.upload_url
        );

        let request = self.build_request(&image, sent_tx);
        tokio::spawn(drive_upload(
            request,
            image.size(),
            sent_rx,
            self.timeout,
            cancel,
            tx,
        ));

        ReceiverStream::new(rx).boxed()
    }
}

/// Split the payload into zero-copy slices of at most `chunk_size` bytes
fn split_chunks(data: Bytes, chunk_size: usize) -> impl Iterator<Item = Bytes> {
    let len = data.len();
    (0..len)
        .step_by(chunk_size)
        .map(move |start| data.slice(start..(start + chunk_size).min(len)))
}

/// Stream the payload in chunks, reporting the running byte count as the
/// HTTP client pulls each one.
fn chunked_body(data: Bytes, chunk_size: usize, sent_tx: mpsc::UnboundedSender<u64>) -> Body {
    let mut sent = 0u64;
    let stream = futures::stream::iter(split_chunks(data, chunk_size)).map(move |chunk| {
        sent += chunk.len() as u64;
        let _ = sent_tx.send(sent);
        Ok::<Bytes, std::io::Error>(chunk)
    });

    Body::wrap_stream(stream)
}

async fn drive_upload(
    request: RequestBuilder,
    total: u64,
    mut sent_rx: mpsc::UnboundedReceiver<u64>,
    timeout: Duration,
    cancel: CancellationToken,
    tx: mpsc::Sender<TransportEvent>,
) {
    let mut tracker = ProgressTracker::new(total);

    let exchange = async move {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok::<_, reqwest::Error>(UploadResponse { status, body })
    };
    tokio::pin!(exchange);

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let terminal = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                info!("Upload cancelled at {}%", tracker.current().percent);
                break TerminalEvent::Aborted;
            }
            _ = &mut deadline => {
                warn!("Upload exceeded {:?}", timeout);
                break TerminalEvent::TimedOut;
            }
            Some(sent) = sent_rx.recv() => {
                if let Some(progress) = tracker.observe(sent) {
                    if tx.send(TransportEvent::Progress(progress)).await.is_err() {
                        debug!("Upload receiver dropped, stopping");
                        return;
                    }
                }
            }
            result = &mut exchange => {
                while let Ok(sent) = sent_rx.try_recv() {
                    if let Some(progress) = tracker.observe(sent) {
                        let _ = tx.send(TransportEvent::Progress(progress)).await;
                    }
                }
                break match result {
                    Ok(response) => {
                        debug!("Upload answered with HTTP {}", response.status);
                        TerminalEvent::Completed(response)
                    }
                    Err(e) if e.is_timeout() => TerminalEvent::TimedOut,
                    Err(e) => {
                        debug!("Upload connection error: {}", e);
                        TerminalEvent::NetworkError {
                            message: describe(&e),
                        }
                    }
                };
            }
        }
    };

    let _ = tx
        .send(TransportEvent::Finished {
            event: terminal,
            last_progress: tracker.current(),
        })
        .await;
}

/// reqwest's Display hides the underlying cause; walk the source chain.
fn describe(error: &reqwest::Error) -> String {
    let mut message = error.to_string();
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = std::error::Error::source(cause);
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upload_url() {
        let config = UpdateConfig::builder("http://192.168.4.1").build();
        let transport = HttpTransport::from_config(&config).unwrap();
        assert_eq!(
            transport.upload_url().as_str(),
            "http://192.168.4.1/api/firmware/upload"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let config = UpdateConfig::builder("not a url").build();
        assert!(HttpTransport::from_config(&config).is_err());
    }

    #[test]
    fn test_split_chunks() {
        let lengths: Vec<usize> = split_chunks(Bytes::from(vec![7u8; 10]), 4)
            .map(|chunk| chunk.len())
            .collect();
        assert_eq!(lengths, vec![4, 4, 2]);

        let exact: Vec<Bytes> = split_chunks(Bytes::from_static(b"abcd"), 2).collect();
        assert_eq!(exact, vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]);
    }
}
