//! Outbound model leg over `tokio-tungstenite`.

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use reqwest::header::{HeaderName, HeaderValue};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use super::credential::AzureCredential;
use super::{BoxFuture, CloseReason, FrameSink, FrameSource, Leg, ModelConnector};
use crate::error::{Error, Result};
use crate::protocol::Frame;
use crate::{TRACE_LOG_MAX_BYTES, safe_truncate};

pub const DEFAULT_API_VERSION: &str = "2024-10-01-preview";
pub const REQUEST_ID_HEADER: &str = "x-ms-client-request-id";

const REALTIME_PATH: &str = "/openai/realtime";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens realtime sessions against an Azure OpenAI deployment.
#[derive(Debug, Clone)]
pub struct AzureRealtimeConnector {
    endpoint: Url,
    deployment: String,
    api_version: String,
    credential: AzureCredential,
}

impl AzureRealtimeConnector {
    /// # Errors
    /// Returns an error if `endpoint` is not a URL.
    #[allow(clippy::result_large_err)]
    pub fn new(
        endpoint: &str,
        deployment: impl Into<String>,
        credential: AzureCredential,
    ) -> Result<Self> {
        Ok(Self {
            endpoint: Url::parse(endpoint)?,
            deployment: deployment.into(),
            api_version: DEFAULT_API_VERSION.to_string(),
            credential,
        })
    }

    #[must_use]
    pub fn with_api_version(mut self, api_version: impl Into<String>) -> Self {
        self.api_version = api_version.into();
        self
    }

    /// `wss://{host}/openai/realtime?api-version=…&deployment=…`
    ///
    /// # Errors
    /// Returns an error if the endpoint scheme cannot be mapped to a WebSocket scheme.
    #[allow(clippy::result_large_err)]
    pub fn realtime_url(&self) -> Result<Url> {
        let mut url = self.endpoint.clone();
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(Error::Config(format!(
                    "unsupported model endpoint scheme: {other}"
                )));
            }
        };
        url.set_scheme(scheme)
            .map_err(|()| Error::Config(format!("cannot use scheme {scheme} for {url}")))?;
        url.set_path(REALTIME_PATH);
        url.set_fragment(None);
        url.query_pairs_mut()
            .clear()
            .append_pair("api-version", &self.api_version)
            .append_pair("deployment", &self.deployment);
        Ok(url)
    }

    async fn open(&self, request_id: &str) -> Result<Leg> {
        let url = self.realtime_url()?;
        let mut req = url.as_str().into_client_request()?;
        let (name, value) = self.credential.header().await?;
        let headers = req.headers_mut();
        headers.insert(name, value);
        headers.insert(
            HeaderName::from_static(REQUEST_ID_HEADER),
            HeaderValue::from_str(request_id)?,
        );

        let (stream, _) = connect_async(req).await?;
        tracing::info!(deployment = %self.deployment, "Connected to realtime model");

        let (write, read) = stream.split();
        Ok(Leg::new(ModelSink { write }, ModelSource { read }))
    }
}

impl ModelConnector for AzureRealtimeConnector {
    fn connect<'a>(&'a self, request_id: &'a str) -> BoxFuture<'a, Result<Leg>> {
        Box::pin(self.open(request_id))
    }
}

struct ModelSink {
    write: SplitSink<WsStream, Message>,
}

impl FrameSink for ModelSink {
    fn send(&mut self, frame: Frame) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let json = frame.to_text()?;
            tracing::trace!("Sending to model: {}", safe_truncate(&json, TRACE_LOG_MAX_BYTES));
            self.write.send(Message::Text(json.into())).await?;
            Ok(())
        })
    }

    fn close(&mut self, reason: CloseReason) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let frame = CloseFrame {
                code: CloseCode::from(reason.code),
                reason: reason.reason.into(),
            };
            match self.write.send(Message::Close(Some(frame))).await {
                Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
                Err(err) => Err(err.into()),
            }
        })
    }
}

struct ModelSource {
    read: SplitStream<WsStream>,
}

impl FrameSource for ModelSource {
    fn next_frame(&mut self) -> BoxFuture<'_, Result<Option<Frame>>> {
        Box::pin(async move {
            while let Some(msg) = self.read.next().await {
                match msg {
                    Ok(Message::Text(text)) => {
                        tracing::trace!(
                            "Received from model: {}",
                            safe_truncate(text.as_str(), TRACE_LOG_MAX_BYTES)
                        );
                        match Frame::parse(text.as_str()) {
                            Ok(frame) => return Ok(Some(frame)),
                            Err(err) => tracing::warn!("Dropping unparseable model frame: {err}"),
                        }
                    }
                    Ok(Message::Close(frame)) => {
                        tracing::info!(?frame, "Model closed the connection");
                        return Ok(None);
                    }
                    Ok(Message::Binary(_)) => tracing::debug!("Ignoring binary frame from model"),
                    Ok(_) => (),
                    Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return Ok(None),
                    Err(err) => return Err(err.into()),
                }
            }
            Ok(None)
        })
    }
}
