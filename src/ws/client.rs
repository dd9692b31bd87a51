use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::CONTENT_TYPE;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{WebSocketStream, client_async};
use tracing::{debug, info, warn};

use super::{SessionEvent, SessionHooks, SessionState};
use crate::command::Command;
use crate::config::ServerConfig;
use crate::error::{BridgeError, Result};

const APPLICATION_JSON: &str = "application/json";

type WsStream = WebSocketStream<TcpStream>;

/// Opens the TCP leg of a connection to `host:port`.
type Dialer = fn(String, u16) -> BoxFuture<'static, std::io::Result<TcpStream>>;

fn dial_tcp(host: String, port: u16) -> BoxFuture<'static, std::io::Result<TcpStream>> {
    Box::pin(async move { TcpStream::connect((host.as_str(), port)).await })
}

/// One outbound web socket connection and its state machine.
///
/// Every transition happens inside `&mut self` methods, so whoever owns the
/// session (the bridge loop) is the only one that can change it.
pub struct Session<H: SessionHooks> {
    connect_timeout: Duration,
    request_timeout: Duration,
    state: SessionState,
    stream: Option<WsStream>,
    hooks: H,
    dial: Dialer,
}

impl<H: SessionHooks> Session<H> {
    pub fn new(connect_timeout: Duration, request_timeout: Duration, hooks: H) -> Self {
        Self {
            connect_timeout,
            request_timeout,
            state: SessionState::Idle,
            stream: None,
            hooks,
            dial: dial_tcp,
        }
    }

    #[cfg(test)]
    fn with_dialer(mut self, dial: Dialer) -> Self {
        self.dial = dial;
        self
    }

    pub fn from_config(config: &ServerConfig, hooks: H) -> Self {
        Self::new(config.connect_timeout, config.request_timeout, hooks)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    #[cfg(test)]
    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Open the connection. Valid from `Idle`, `Failed` or `Closed`.
    pub async fn connect(&mut self, url: &str) -> Result<()> {
        if !self.state.can_connect() {
            return Err(BridgeError::InvalidState { state: self.state });
        }
        self.state = SessionState::Connecting;
        debug!("Connecting to {}", url);

        match open(url, self.connect_timeout, self.request_timeout, self.dial).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = SessionState::Connected;
                self.hooks.on_connect_success(url);
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Failed;
                self.hooks.on_connect_error(&e);
                Err(e)
            }
        }
    }

    /// Write one command as a JSON text frame.
    pub async fn send(&mut self, command: &Command) -> Result<()> {
        let (SessionState::Connected, Some(stream)) = (self.state, self.stream.as_mut()) else {
            return Err(BridgeError::NotConnected);
        };
        let payload = serde_json::to_string(command)?;

        if let Err(e) = stream.send(Message::Text(payload.into())).await {
            let e = BridgeError::from(e);
            self.fail(&e);
            return Err(e);
        }
        Ok(())
    }

    /// Wait for the next inbound frame. Pends forever while not connected,
    /// so it can sit in a `select!` next to other work.
    pub async fn next_event(&mut self) -> SessionEvent {
        let Some(stream) = self.stream.as_mut() else {
            return std::future::pending().await;
        };

        let frame = loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => break Ok(Some(text.to_string())),
                Some(Ok(Message::Binary(data))) => {
                    break Ok(Some(String::from_utf8_lossy(&data).into_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    debug!("Close frame from server: {:?}", frame);
                    break Ok(None);
                }
                // Pings are answered by tungstenite itself.
                Some(Ok(_)) => continue,
                Some(Err(e)) => break Err(e),
                None => break Ok(None),
            }
        };

        match frame {
            Ok(Some(text)) => {
                self.hooks.on_message(&text);
                SessionEvent::Message(text)
            }
            Ok(None) => {
                self.stream = None;
                self.state = SessionState::Closed;
                self.hooks.on_connection_close();
                SessionEvent::Closed
            }
            Err(e) => {
                let e = BridgeError::from(e);
                self.fail(&e);
                SessionEvent::Failed(e)
            }
        }
    }

    /// Graceful shutdown: send a close frame and wait (up to the request
    /// timeout) for the server to finish the close handshake.
    pub async fn close(&mut self) -> Result<()> {
        if self.state != SessionState::Connected {
            return Err(BridgeError::AlreadyClosed);
        }
        let Some(mut stream) = self.stream.take() else {
            return Err(BridgeError::AlreadyClosed);
        };
        self.state = SessionState::Closing;

        let drain = async {
            stream.close(None).await?;
            while let Some(msg) = stream.next().await {
                msg?;
            }
            Ok::<_, tokio_tungstenite::tungstenite::Error>(())
        };
        match timeout(self.request_timeout, drain).await {
            Ok(Ok(())) => debug!("Close handshake complete"),
            Ok(Err(e)) => debug!("Close handshake ended early: {}", e),
            Err(_) => warn!("Server did not finish close handshake within {:?}", self.request_timeout),
        }

        self.state = SessionState::Closed;
        self.hooks.on_connection_close();
        Ok(())
    }

    /// Drop whatever is in flight, e.g. after a pending `connect` was
    /// abandoned on shutdown.
    pub fn abort(&mut self) {
        if matches!(
            self.state,
            SessionState::Connecting | SessionState::Connected | SessionState::Closing
        ) {
            info!("Aborting connection in state {:?}", self.state);
            self.stream = None;
            self.state = SessionState::Closed;
        }
    }

    fn fail(&mut self, cause: &BridgeError) {
        self.stream = None;
        self.state = SessionState::Failed;
        self.hooks.on_connect_error(cause);
    }
}

/// TCP connect bounded by `connect_timeout`, the whole upgrade bounded by
/// `request_timeout`. The request carries `Content-Type: application/json`.
async fn open(
    url: &str,
    connect_timeout: Duration,
    request_timeout: Duration,
    dial: Dialer,
) -> Result<WsStream> {
    let mut request = url
        .into_client_request()
        .map_err(|e| BridgeError::Connect(format!("invalid server address {url}: {e}")))?;
    request
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(APPLICATION_JSON));

    let uri = request.uri();
    if uri.scheme_str() != Some("ws") {
        return Err(BridgeError::Connect(format!(
            "unsupported scheme in {url} (only ws:// is supported)"
        )));
    }
    let host = uri
        .host()
        .ok_or_else(|| BridgeError::Connect(format!("no host in {url}")))?
        .trim_start_matches('[')
        .trim_end_matches(']')
        .to_string();
    let port = uri.port_u16().unwrap_or(80);

    let handshake = async move {
        let tcp = timeout(connect_timeout, dial(host.clone(), port))
            .await
            .map_err(|_| {
                BridgeError::Connect(format!(
                    "timed out after {connect_timeout:?} connecting to {host}:{port}"
                ))
            })?
            .map_err(|e| BridgeError::Connect(format!("{host}:{port}: {e}")))?;
        if let Err(e) = tcp.set_nodelay(true) {
            debug!("Could not disable Nagle on {}:{}: {}", host, port, e);
        }

        let (ws, response) = client_async(request, tcp)
            .await
            .map_err(|e| BridgeError::Connect(format!("handshake failed: {e}")))?;
        debug!("Handshake complete ({})", response.status());
        Ok::<_, BridgeError>(ws)
    };

    timeout(request_timeout, handshake)
        .await
        .map_err(|_| {
            BridgeError::Connect(format!(
                "no handshake within {:?} from {url}",
                request_timeout
            ))
        })?
}

#[cfg(test)]
mod tests {
    use std::future::Future;

    use tokio::net::TcpListener;
    use tokio::sync::oneshot;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
    use tokio_tungstenite::{accept_async, accept_hdr_async};

    use super::*;

    #[derive(Default)]
    struct Recorder {
        successes: usize,
        errors: usize,
        closes: usize,
        messages: Vec<String>,
    }

    impl SessionHooks for Recorder {
        fn on_connect_success(&mut self, _url: &str) {
            self.successes += 1;
        }

        fn on_connect_error(&mut self, _cause: &BridgeError) {
            self.errors += 1;
        }

        fn on_connection_close(&mut self) {
            self.closes += 1;
        }

        fn on_message(&mut self, frame: &str) {
            self.messages.push(frame.to_string());
        }
    }

    fn session() -> Session<Recorder> {
        Session::new(
            Duration::from_millis(500),
            Duration::from_secs(2),
            Recorder::default(),
        )
    }

    /// Accept one web socket client and hand it to `handler`.
    async fn serve_once<F, Fut>(handler: F) -> String
    where
        F: FnOnce(WsStream) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = accept_async(tcp).await.unwrap();
            handler(ws).await;
        });
        format!("ws://{addr}/socket/")
    }

    async fn unused_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{addr}/socket/")
    }

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let mut s = session();
        let err = s.send(&Command::light("lamp")).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected));
        assert_eq!(s.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn close_without_connection_is_already_closed() {
        let mut s = session();
        assert!(matches!(s.close().await, Err(BridgeError::AlreadyClosed)));
    }

    #[tokio::test]
    async fn refused_connect_fails_once() {
        let mut s = session();
        let url = unused_port_url().await;
        let err = s.connect(&url).await.unwrap_err();
        assert!(matches!(err, BridgeError::Connect(_)));
        assert_eq!(s.state(), SessionState::Failed);
        assert_eq!(s.hooks().errors, 1);
        assert_eq!(s.hooks().successes, 0);
    }

    /// A dial that never completes, like a SYN to a host that drops it.
    fn dial_blackhole(_host: String, _port: u16) -> BoxFuture<'static, std::io::Result<TcpStream>> {
        Box::pin(std::future::pending())
    }

    #[tokio::test]
    async fn unanswered_dial_trips_connect_timeout() {
        let mut s = Session::new(
            Duration::from_millis(150),
            Duration::from_secs(5),
            Recorder::default(),
        )
        .with_dialer(dial_blackhole);

        let started = std::time::Instant::now();
        let err = s.connect("ws://10.255.255.1:80/").await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(2));
        match err {
            BridgeError::Connect(msg) => assert!(msg.contains("timed out"), "{msg}"),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(s.state(), SessionState::Failed);
        assert_eq!(s.hooks().errors, 1);
        assert_eq!(s.hooks().successes, 0);
    }

    #[tokio::test]
    async fn silent_server_trips_request_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            // Accept TCP but never answer the upgrade request.
            let (_tcp, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let mut s = Session::new(
            Duration::from_secs(1),
            Duration::from_millis(200),
            Recorder::default(),
        );
        let err = s.connect(&format!("ws://{addr}/")).await.unwrap_err();
        assert!(err.to_string().contains("no handshake"), "{err}");
        assert_eq!(s.state(), SessionState::Failed);
        assert_eq!(s.hooks().errors, 1);
    }

    #[tokio::test]
    async fn unsupported_scheme_is_a_connect_error() {
        let mut s = session();
        let err = s.connect("http://127.0.0.1:1/").await.unwrap_err();
        assert!(matches!(err, BridgeError::Connect(_)));
        assert_eq!(s.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn sends_json_frames_with_content_type_header() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (header_tx, header_rx) = oneshot::channel();
        let (frame_tx, frame_rx) = oneshot::channel();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let callback = |req: &Request, resp: Response| -> std::result::Result<Response, ErrorResponse> {
                let value = req
                    .headers()
                    .get(CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_string);
                let _ = header_tx.send(value);
                Ok(resp)
            };
            let mut ws = accept_hdr_async(tcp, callback).await.unwrap();
            let msg = ws.next().await.unwrap().unwrap();
            let _ = frame_tx.send(msg.into_text().unwrap().to_string());
        });

        let mut s = session();
        s.connect(&format!("ws://{addr}/socket/")).await.unwrap();
        assert_eq!(s.state(), SessionState::Connected);
        assert_eq!(s.hooks().successes, 1);

        s.send(&Command::light("lamp")).await.unwrap();

        assert_eq!(header_rx.await.unwrap().as_deref(), Some(APPLICATION_JSON));
        let frame = frame_rx.await.unwrap();
        let parsed: Command = serde_json::from_str(&frame).unwrap();
        assert_eq!(parsed, Command::light("lamp"));
    }

    #[tokio::test]
    async fn connect_twice_is_rejected() {
        let url = serve_once(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;
        let mut s = session();
        s.connect(&url).await.unwrap();
        let err = s.connect(&url).await.unwrap_err();
        assert!(matches!(
            err,
            BridgeError::InvalidState {
                state: SessionState::Connected
            }
        ));
    }

    #[tokio::test]
    async fn inbound_frames_pass_through_then_server_close() {
        let url = serve_once(|mut ws| async move {
            ws.send(Message::Text("scene:storm".into())).await.unwrap();
            ws.close(None).await.unwrap();
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;

        let mut s = session();
        s.connect(&url).await.unwrap();

        match s.next_event().await {
            SessionEvent::Message(text) => assert_eq!(text, "scene:storm"),
            other => panic!("expected message, got {other:?}"),
        }
        assert!(matches!(s.next_event().await, SessionEvent::Closed));
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(s.hooks().closes, 1);
        assert_eq!(s.hooks().messages, vec!["scene:storm".to_string()]);

        let err = s.send(&Command::light("lamp")).await.unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected));
    }

    #[tokio::test]
    async fn graceful_close_then_reconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            for _ in 0..2 {
                let (tcp, _) = listener.accept().await.unwrap();
                let mut ws = accept_async(tcp).await.unwrap();
                while let Some(Ok(_)) = ws.next().await {}
            }
        });
        let url = format!("ws://{addr}/");

        let mut s = session();
        s.connect(&url).await.unwrap();
        s.close().await.unwrap();
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(s.hooks().closes, 1);
        assert!(matches!(s.close().await, Err(BridgeError::AlreadyClosed)));

        s.connect(&url).await.unwrap();
        assert_eq!(s.state(), SessionState::Connected);
        s.send(&Command::light("lightoff")).await.unwrap();
    }

    #[tokio::test]
    async fn abort_releases_the_connection() {
        let url = serve_once(|mut ws| async move {
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;
        let mut s = session();
        s.connect(&url).await.unwrap();
        s.abort();
        assert_eq!(s.state(), SessionState::Closed);
        assert!(matches!(
            s.send(&Command::light("lamp")).await,
            Err(BridgeError::NotConnected)
        ));
    }
}
