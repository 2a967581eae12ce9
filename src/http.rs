//! Minimal HTTP/1.1 text helpers.
//!
//! Nothing here parses HTTP: requests and responses are formatted as text
//! and written to an established [`Transport`]; answers are returned as
//! text, with [`body`] splitting headers from the body at the first blank
//! line.

use std::fmt;

use crate::error::{Error, Result};
use crate::socket::Transport;

/// Value of the `User-Agent` and `Server` headers.
pub const USER_AGENT: &str = concat!("easy-socket/", env!("CARGO_PKG_VERSION"));

const HEADER_END: &str = "\r\n\r\n";

/// Request methods supported by the helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// `GET`
    Get,
    /// `POST`, sent with a `Content-Length`.
    Post,
}

impl Method {
    /// Method name as written on the request line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP request rendered by its `Display` implementation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    method: Method,
    path: String,
    host: String,
    headers: Vec<(String, String)>,
    raw_headers: String,
    body: Option<String>,
}

impl Request {
    /// Starts a request for `path` on `host`.
    pub fn new(method: Method, path: impl Into<String>, host: impl Into<String>) -> Self {
        Request {
            method,
            path: path.into(),
            host: host.into(),
            headers: Vec::new(),
            raw_headers: String::new(),
            body: None,
        }
    }

    /// Adds a `name: value` header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Appends a pre-formatted header block; each line must end with `\r\n`.
    pub fn raw_headers(mut self, block: impl AsRef<str>) -> Self {
        self.raw_headers.push_str(block.as_ref());
        self
    }

    /// Sets the request body.
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Asks the server to close the connection after answering.
    pub fn connection_close(self) -> Self {
        self.header("Connection", "close")
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} HTTP/1.1\r\n", self.method, self.path)?;
        write!(f, "Host: {}\r\n", self.host)?;
        write!(f, "User-Agent: {USER_AGENT}\r\n")?;
        if self.method == Method::Post {
            let len = self.body.as_ref().map_or(0, String::len);
            f.write_str("Content-Type: application/x-www-form-urlencoded\r\n")?;
            write!(f, "Content-Length: {len}\r\n")?;
        }
        for (name, value) in &self.headers {
            write!(f, "{name}: {value}\r\n")?;
        }
        f.write_str(&self.raw_headers)?;
        f.write_str("\r\n")?;
        if let Some(body) = &self.body {
            f.write_str(body)?;
        }
        Ok(())
    }
}

/// Formats the canned `200 OK` plain-text response carrying `msg`.
pub fn ok_response(msg: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\n\
         Server: {USER_AGENT}\r\n\
         Accept-Ranges: bytes\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         Content-Type: text/plain; charset=UTF-8\r\n\
         \r\n\
         {msg}",
        msg.len()
    )
}

/// Returns the part of `text` after the first blank line, if there is one.
pub fn body(text: &str) -> Option<&str> {
    text.find(HEADER_END).map(|pos| &text[pos + HEADER_END.len()..])
}

/// Formats and sends a request addressed to the connection's host.
///
/// `extra_headers` is a pre-formatted header block; a `POST` always
/// carries a `Content-Length`, zero without `data`.
pub fn send_request<C: Transport + ?Sized>(
    conn: &mut C,
    method: Method,
    extra_headers: Option<&str>,
    data: Option<&str>,
    path: &str,
) -> Result<usize> {
    let mut request = Request::new(method, path, conn.host());
    if let Some(headers) = extra_headers {
        request = request.raw_headers(headers);
    }
    if let Some(data) = data {
        request = request.body(data);
    }
    log::debug!("Sending {method} {path}");
    conn.send(request.to_string().as_bytes())
}

/// Answers a request with [`ok_response`].
pub fn answer_request<C: Transport + ?Sized>(conn: &mut C, msg: &str) -> Result<usize> {
    conn.send(ok_response(msg).as_bytes())
}

/// Sends a `GET` asking the server to close, then reads until it does.
pub fn get<C: Transport + ?Sized>(conn: &mut C, path: &str) -> Result<String> {
    let request = Request::new(Method::Get, path, conn.host())
        .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8")
        .header("Accept-Encoding", "deflate")
        .connection_close();
    log::debug!("Sending GET {path}");
    conn.send(request.to_string().as_bytes())?;

    let mut page = wait_for_answer_bytes(conn)?;
    loop {
        match conn.receive() {
            Ok(Some(more)) => page.extend_from_slice(&more),
            Ok(None) | Err(Error::Timeout) => break,
            Err(e) => return Err(e),
        }
    }
    Ok(String::from_utf8_lossy(&page).into_owned())
}

/// Like [`get`], returning only the body.
pub fn get_contents<C: Transport + ?Sized>(conn: &mut C, path: &str) -> Result<String> {
    let page = get(conn, path)?;
    Ok(body(&page).unwrap_or_default().to_owned())
}

/// Waits for the first answer on the connection.
///
/// Receive timeouts are retried; a peer closing without answering is
/// [`Error::Disconnected`].
pub fn wait_for_answer<C: Transport + ?Sized>(conn: &mut C) -> Result<String> {
    let answer = wait_for_answer_bytes(conn)?;
    Ok(String::from_utf8_lossy(&answer).into_owned())
}

fn wait_for_answer_bytes<C: Transport + ?Sized>(conn: &mut C) -> Result<Vec<u8>> {
    loop {
        match conn.receive() {
            Ok(Some(answer)) => return Ok(answer),
            Ok(None) => return Err(Error::Disconnected),
            Err(Error::Timeout) => log::trace!("Still waiting for an answer"),
            Err(e) => return Err(e),
        }
    }
}
