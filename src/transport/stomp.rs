use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use uuid::Uuid;

use crate::config::Config;
use crate::error::{MqError, Result};
use crate::message::{Headers, RawMessage};
use crate::transport::{Backend, SubscribeOptions, Transport};

/// Largest frame accepted from a broker, headers included.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

fn oversized(what: &str) -> MqError {
    MqError::Protocol(format!("{what} exceeds {MAX_FRAME_SIZE} bytes"))
}

/// One STOMP frame: command line, headers, body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Headers,
    pub body: String,
}

impl Frame {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Headers::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    pub fn headers(mut self, headers: &Headers) -> Self {
        self.headers
            .extend(headers.iter().map(|(k, v)| (k.clone(), v.clone())));
        self
    }

    /// Sets the body and a matching `content-length`.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self.headers
            .insert("content-length".to_string(), self.body.len().to_string());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.command.len() + self.body.len() + 64);
        out.extend_from_slice(self.command.as_bytes());
        out.push(b'\n');
        for (key, value) in &self.headers {
            out.extend_from_slice(key.as_bytes());
            out.push(b':');
            out.extend_from_slice(value.as_bytes());
            out.push(b'\n');
        }
        out.push(b'\n');
        out.extend_from_slice(self.body.as_bytes());
        out.push(0);
        out
    }

    /// Parses the first complete frame in `buf`, returning it with the number of
    /// bytes consumed. Leading heart-beat EOLs are skipped. `Ok(None)` means more
    /// input is needed. Frames larger than [`MAX_FRAME_SIZE`] and bodies that are
    /// not UTF-8 are rejected with [`MqError::Protocol`].
    pub fn parse(buf: &[u8]) -> Result<Option<(Frame, usize)>> {
        let mut pos = buf
            .iter()
            .take_while(|b| **b == b'\n' || **b == b'\r')
            .count();

        let mut lines = Vec::new();
        loop {
            let Some(len) = buf[pos..].iter().position(|b| *b == b'\n') else {
                if buf.len() > MAX_FRAME_SIZE {
                    return Err(oversized("frame headers"));
                }
                return Ok(None);
            };
            let mut line = &buf[pos..pos + len];
            if line.last() == Some(&b'\r') {
                line = &line[..line.len() - 1];
            }
            pos += len + 1;
            if line.is_empty() {
                break;
            }
            lines.push(
                std::str::from_utf8(line)
                    .map_err(|_| MqError::Protocol("frame header is not UTF-8".to_string()))?,
            );
        }

        let (command, header_lines) = lines
            .split_first()
            .ok_or_else(|| MqError::Protocol("frame has no command".to_string()))?;

        let mut headers = Headers::new();
        for line in header_lines {
            let (key, value) = line
                .split_once(':')
                .ok_or_else(|| MqError::Protocol(format!("malformed header line '{line}'")))?;
            // Repeated headers: the first occurrence wins
            headers
                .entry(key.to_string())
                .or_insert_with(|| value.to_string());
        }

        let body_end = match headers.get("content-length") {
            Some(length) => {
                let length: usize = length.trim().parse().map_err(|_| {
                    MqError::Protocol(format!("invalid content-length '{length}'"))
                })?;
                if length > MAX_FRAME_SIZE {
                    return Err(oversized("declared content-length"));
                }
                let end = pos.checked_add(length).ok_or_else(|| oversized("frame"))?;
                if buf.len() <= end {
                    return Ok(None);
                }
                if buf[end] != 0 {
                    return Err(MqError::Protocol(
                        "frame body is not NUL terminated".to_string(),
                    ));
                }
                end
            }
            None => match buf[pos..].iter().position(|b| *b == 0) {
                Some(len) => pos + len,
                None if buf.len() - pos > MAX_FRAME_SIZE => return Err(oversized("frame body")),
                None => return Ok(None),
            },
        };

        let body = std::str::from_utf8(&buf[pos..body_end])
            .map_err(|_| MqError::Protocol("frame body is not UTF-8".to_string()))?;
        let frame = Frame {
            command: command.to_string(),
            headers,
            body: body.to_string(),
        };
        Ok(Some((frame, body_end + 1)))
    }
}

/// STOMP 1.0 client over TCP.
pub struct StompTransport {
    address: String,
    login: Option<String>,
    passcode: Option<String>,
    client_id: Option<String>,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
    buffer: Vec<u8>,
    subscription_ids: HashMap<String, String>,
}

impl StompTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            address: format!("{}:{}", host.into(), port),
            login: None,
            passcode: None,
            client_id: None,
            connect_timeout: Duration::from_secs(30),
            stream: None,
            buffer: Vec::new(),
            subscription_ids: HashMap::new(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            login: config.login.clone(),
            passcode: config.passcode.clone(),
            client_id: config.client_id.clone(),
            connect_timeout: config.connect_timeout,
            ..Self::new(config.host.clone(), config.port)
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn connect_frame(&self) -> Frame {
        let mut frame = Frame::new("CONNECT");
        if let Some(login) = &self.login {
            frame = frame.header("login", login.clone());
        }
        if let Some(passcode) = &self.passcode {
            frame = frame.header("passcode", passcode.clone());
        }
        if let Some(client_id) = &self.client_id {
            frame = frame.header("client-id", client_id.clone());
        }
        frame
    }

    async fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| MqError::Connection("STOMP transport is not open".to_string()))?;
        stream.write_all(&frame.encode()).await?;
        stream.flush().await?;
        Ok(())
    }

    /// Reads the next frame. A frame that cannot be parsed leaves the stream
    /// out of sync, so the session is dropped and later calls report a
    /// connection error.
    async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            match Frame::parse(&self.buffer) {
                Ok(Some((frame, used))) => {
                    self.buffer.drain(..used);
                    return Ok(frame);
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "unreadable frame, dropping STOMP session");
                    self.buffer.clear();
                    self.stream = None;
                    return Err(err);
                }
            }

            let stream = self
                .stream
                .as_mut()
                .ok_or_else(|| MqError::Connection("STOMP transport is not open".to_string()))?;
            if stream.read_buf(&mut self.buffer).await? == 0 {
                return Err(MqError::Connection(
                    "connection closed by broker".to_string(),
                ));
            }
        }
    }

    async fn next_message(&mut self) -> Result<RawMessage> {
        loop {
            let frame = self.read_frame().await?;
            match frame.command.as_str() {
                "MESSAGE" => {
                    return Ok(RawMessage {
                        destination: frame.get("destination").unwrap_or_default().to_string(),
                        receipt: frame.get("message-id").map(str::to_string),
                        body: frame.body,
                        headers: frame.headers,
                    })
                }
                "ERROR" => {
                    return Err(MqError::Protocol(format!(
                        "{}: {}",
                        frame.get("message").unwrap_or("broker error"),
                        frame.body.trim_end()
                    )))
                }
                other => tracing::debug!(command = other, "ignoring frame while receiving"),
            }
        }
    }
}

#[async_trait]
impl Transport for StompTransport {
    fn backend(&self) -> Backend {
        Backend::Stomp
    }

    async fn open(&mut self) -> Result<()> {
        let wait_ms = self.connect_timeout.as_millis() as u64;
        let stream = timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| {
                MqError::Connection(format!(
                    "connect to {} timed out after {wait_ms}ms",
                    self.address
                ))
            })?
            .map_err(|e| MqError::Connection(e.to_string()))?;

        self.stream = Some(stream);
        self.buffer.clear();
        let connect = self.connect_frame();
        self.write_frame(&connect).await?;

        let reply = timeout(self.connect_timeout, self.read_frame())
            .await
            .map_err(|_| {
                MqError::Connection(format!("no CONNECTED frame after {wait_ms}ms"))
            })??;
        match reply.command.as_str() {
            "CONNECTED" => {
                tracing::debug!(
                    address = %self.address,
                    session = ?reply.get("session"),
                    "STOMP session established"
                );
                Ok(())
            }
            _ => {
                self.stream = None;
                Err(MqError::Connection(format!(
                    "broker refused connection: {}",
                    reply.get("message").unwrap_or(reply.command.as_str())
                )))
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.stream.is_some() {
            if let Err(err) = self.write_frame(&Frame::new("DISCONNECT")).await {
                tracing::debug!(error = %err, "DISCONNECT not delivered");
            }
            if let Some(mut stream) = self.stream.take() {
                let _ = stream.shutdown().await;
            }
        }
        self.buffer.clear();
        self.subscription_ids.clear();
        Ok(())
    }

    async fn subscribe(&mut self, destination: &str, options: &SubscribeOptions) -> Result<()> {
        let id = Uuid::now_v7().to_string();
        let frame = Frame::new("SUBSCRIBE")
            .headers(&options.headers)
            .header("destination", destination)
            .header("id", id.clone())
            .header("ack", options.ack.as_str());
        self.write_frame(&frame).await?;
        self.subscription_ids.insert(destination.to_string(), id);
        Ok(())
    }

    async fn unsubscribe(&mut self, destination: &str, options: &SubscribeOptions) -> Result<()> {
        let mut frame = Frame::new("UNSUBSCRIBE")
            .headers(&options.headers)
            .header("destination", destination);
        if let Some(id) = self.subscription_ids.remove(destination) {
            frame = frame.header("id", id);
        }
        self.write_frame(&frame).await
    }

    async fn send(&mut self, destination: &str, body: &str, headers: &Headers) -> Result<()> {
        let frame = Frame::new("SEND")
            .headers(headers)
            .header("destination", destination)
            .body(body);
        self.write_frame(&frame).await
    }

    async fn receive(&mut self, wait: Option<Duration>) -> Result<RawMessage> {
        match wait {
            Some(wait) => timeout(wait, self.next_message())
                .await
                .map_err(|_| MqError::Timeout(wait.as_millis() as u64))?,
            None => self.next_message().await,
        }
    }

    async fn acknowledge(&mut self, receipt: &str, headers: &Headers) -> Result<()> {
        let frame = Frame::new("ACK")
            .headers(headers)
            .header("message-id", receipt);
        self.write_frame(&frame).await
    }
}
