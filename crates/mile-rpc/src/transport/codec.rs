//! HTTP/1.1 message framing over a raw byte stream.

use std::io;

use http::header::{CONNECTION, CONTENT_LENGTH, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, Version};
use tokio::io::{AsyncRead, AsyncReadExt};

const MAX_HEADERS: usize = 64;
const MAX_HEAD_LEN: usize = 64 * 1024;
const MAX_BODY_LEN: usize = 64 * 1024 * 1024;
const READ_CHUNK: usize = 8 * 1024;

/// A decoded response plus whether the connection may carry another one.
#[derive(Debug)]
pub(crate) struct Decoded {
    pub(crate) response: Response<String>,
    pub(crate) keep_alive: bool,
}

pub(crate) fn encode_request(request: &Request<String>) -> Vec<u8> {
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let body = request.body().as_bytes();

    let mut out = Vec::with_capacity(256 + body.len());
    out.extend_from_slice(format!("{} {target} HTTP/1.1\r\n", request.method()).as_bytes());
    for (name, value) in request.headers() {
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(body);
    out
}

/// Read one response. `buf` holds bytes received but not yet consumed and
/// keeps any surplus for the next call.
pub(crate) async fn read_response<R>(io: &mut R, buf: &mut Vec<u8>) -> io::Result<Decoded>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let head = loop {
        match parse_head(buf)? {
            // Interim 1xx responses carry no body.
            Some(head) if head.status.is_informational() => {
                buf.drain(..head.len);
            }
            Some(head) => {
                buf.drain(..head.len);
                break head;
            }
            None if buf.len() > MAX_HEAD_LEN => {
                return Err(invalid("response head too large"));
            }
            None => {
                fill(io, buf).await?;
            }
        }
    };

    let mut keep_alive = head.version != Version::HTTP_10 && !wants_close(&head.headers);

    let body = if is_chunked(&head.headers) {
        read_chunked(io, buf).await?
    } else if let Some(len) = content_length(&head.headers)? {
        read_exact_len(io, buf, len).await?
    } else if head.status == StatusCode::NO_CONTENT || head.status == StatusCode::NOT_MODIFIED {
        Vec::new()
    } else {
        keep_alive = false;
        read_to_close(io, buf).await?
    };

    let body = String::from_utf8(body).map_err(|e| invalid(format!("body is not UTF-8: {e}")))?;

    let mut response = Response::new(body);
    *response.status_mut() = head.status;
    *response.version_mut() = head.version;
    *response.headers_mut() = head.headers;

    Ok(Decoded {
        response,
        keep_alive,
    })
}

struct Head {
    len: usize,
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
}

fn parse_head(buf: &[u8]) -> io::Result<Option<Head>> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Response::new(&mut headers);
    let len = match parsed
        .parse(buf)
        .map_err(|e| invalid(format!("malformed response head: {e}")))?
    {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Ok(None),
    };

    let code = parsed.code.ok_or_else(|| invalid("missing status code"))?;
    let status = StatusCode::from_u16(code).map_err(|e| invalid(e.to_string()))?;
    let version = match parsed.version {
        Some(0) => Version::HTTP_10,
        _ => Version::HTTP_11,
    };

    let mut map = HeaderMap::with_capacity(parsed.headers.len());
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| invalid(format!("bad header name: {e}")))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| invalid(format!("bad header value: {e}")))?;
        map.append(name, value);
    }

    Ok(Some(Head {
        len,
        status,
        version,
        headers: map,
    }))
}

fn header_has_token(headers: &HeaderMap, name: HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

fn is_chunked(headers: &HeaderMap) -> bool {
    header_has_token(headers, TRANSFER_ENCODING, "chunked")
}

fn wants_close(headers: &HeaderMap) -> bool {
    header_has_token(headers, CONNECTION, "close")
}

fn content_length(headers: &HeaderMap) -> io::Result<Option<usize>> {
    let Some(value) = headers.get(CONTENT_LENGTH) else {
        return Ok(None);
    };
    let len = value
        .to_str()
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .ok_or_else(|| invalid("invalid content-length"))?;
    if len > MAX_BODY_LEN {
        return Err(invalid(format!("response body too large: {len} bytes")));
    }
    Ok(Some(len))
}

async fn fill<R>(io: &mut R, buf: &mut Vec<u8>) -> io::Result<()>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut chunk = [0u8; READ_CHUNK];
    let n = io.read(&mut chunk).await?;
    if n == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by peer",
        ));
    }
    buf.extend_from_slice(&chunk[..n]);
    Ok(())
}

async fn read_exact_len<R>(io: &mut R, buf: &mut Vec<u8>, len: usize) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    while buf.len() < len {
        fill(io, buf).await?;
    }
    Ok(buf.drain(..len).collect())
}

async fn read_to_close<R>(io: &mut R, buf: &mut Vec<u8>) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut body = std::mem::take(buf);
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        let n = io.read(&mut chunk).await?;
        if n == 0 {
            return Ok(body);
        }
        if body.len() + n > MAX_BODY_LEN {
            return Err(invalid("response body too large"));
        }
        body.extend_from_slice(&chunk[..n]);
    }
}

async fn read_chunked<R>(io: &mut R, buf: &mut Vec<u8>) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut body = Vec::new();
    loop {
        let (consumed, size) = loop {
            match httparse::parse_chunk_size(buf) {
                Ok(httparse::Status::Complete(parsed)) => break parsed,
                Ok(httparse::Status::Partial) => fill(io, buf).await?,
                Err(_) => return Err(invalid("malformed chunk size")),
            }
        };
        buf.drain(..consumed);

        if size == 0 {
            // Trailer section ends with an empty line.
            loop {
                match buf.windows(2).position(|w| w == b"\r\n") {
                    Some(0) => {
                        buf.drain(..2);
                        return Ok(body);
                    }
                    Some(pos) => {
                        buf.drain(..pos + 2);
                    }
                    None => fill(io, buf).await?,
                }
            }
        }

        let size = usize::try_from(size)
            .ok()
            .filter(|size| body.len() + size <= MAX_BODY_LEN)
            .ok_or_else(|| invalid("response body too large"))?;
        while buf.len() < size + 2 {
            fill(io, buf).await?;
        }
        if &buf[size..size + 2] != b"\r\n" {
            return Err(invalid("chunk is not terminated by CRLF"));
        }
        body.extend_from_slice(&buf[..size]);
        buf.drain(..size + 2);
    }
}

fn invalid(message: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn decode(raw: &[u8]) -> io::Result<(Decoded, Vec<u8>)> {
        let mut reader = raw;
        let mut buf = Vec::new();
        let decoded = read_response(&mut reader, &mut buf).await?;
        Ok((decoded, buf))
    }

    #[test]
    fn encode_writes_request_line_headers_and_body() {
        let request = Request::post("/v1/api?x=1")
            .header("host", "mile.global")
            .header("content-length", "2")
            .body("{}".to_owned())
            .expect("valid request");
        let raw = String::from_utf8(encode_request(&request)).expect("ascii");
        assert!(raw.starts_with("POST /v1/api?x=1 HTTP/1.1\r\n"));
        assert!(raw.contains("host: mile.global\r\n"));
        assert!(raw.ends_with("\r\n\r\n{}"));
    }

    #[tokio::test]
    async fn content_length_body() {
        let (decoded, rest) = decode(
            b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n\r\nhelloHTTP/1.1",
        )
        .await
        .expect("should decode");
        assert_eq!(decoded.response.status(), StatusCode::OK);
        assert_eq!(decoded.response.body(), "hello");
        assert!(decoded.keep_alive);
        assert_eq!(rest, b"HTTP/1.1");
    }

    #[tokio::test]
    async fn chunked_body_with_trailer() {
        let (decoded, rest) = decode(
            b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n\
              4\r\n{\"a\"\r\n3\r\n:1}\r\n0\r\nX-Trailer: y\r\n\r\n",
        )
        .await
        .expect("should decode");
        assert_eq!(decoded.response.body(), "{\"a\":1}");
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn body_until_close_disables_keep_alive() {
        let (decoded, _) = decode(b"HTTP/1.1 500 Internal Server Error\r\n\r\noops")
            .await
            .expect("should decode");
        assert_eq!(decoded.response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(decoded.response.body(), "oops");
        assert!(!decoded.keep_alive);
    }

    #[tokio::test]
    async fn connection_close_header_disables_keep_alive() {
        let (decoded, _) = decode(b"HTTP/1.1 200 OK\r\nConnection: close\r\nContent-Length: 0\r\n\r\n")
            .await
            .expect("should decode");
        assert!(!decoded.keep_alive);
    }

    #[tokio::test]
    async fn interim_response_is_skipped() {
        let (decoded, _) = decode(
            b"HTTP/1.1 100 Continue\r\n\r\nHTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\n{}",
        )
        .await
        .expect("should decode");
        assert_eq!(decoded.response.status(), StatusCode::OK);
        assert_eq!(decoded.response.body(), "{}");
    }

    #[tokio::test]
    async fn truncated_body_is_unexpected_eof() {
        let err = decode(b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\n\r\nshort")
            .await
            .expect_err("must fail on truncated body");
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[tokio::test]
    async fn garbage_head_is_invalid_data() {
        let err = decode(b"NOT HTTP AT ALL\r\n\r\n")
            .await
            .expect_err("must reject garbage");
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }
}
