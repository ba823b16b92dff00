//! 🏗 HTTP request implementation

use std::io::Read;
use std::time::{SystemTime, UNIX_EPOCH};

use seckill_core::{Envelope, ErrorCode, RawRequest, Request, RequestKind};
use tiny_http::{Header, Method, Response};
use tracing::{debug, error};
use uuid::Uuid;

/// Header correlating a request with its log lines
const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Body of the 404 response
const NOT_FOUND: &str = "⚡ could not find the service you are looking for!

Valid requests are:
  GET  /seckill?product_id=<id>&src=<str>&authcode=<str>&time=<str>&nance=<str>
  GET  /secinfo[?product_id=<id>]";

/// A request received by the HTTP server, with query and cookies decoded
struct HttpRequest {
    inner: tiny_http::Request,
    query: Vec<(String, String)>,
    cookies: Vec<(String, String)>,
}

impl RawRequest for HttpRequest {
    fn query(&self, name: &str) -> Option<&str> {
        lookup(&self.query, name)
    }

    fn cookie(&self, name: &str) -> Option<&str> {
        lookup(&self.cookies, name)
    }

    fn respond(self: Box<Self>, envelope: Envelope, request_id: Uuid) {
        respond_json(self.inner, &envelope, request_id);
    }
}

fn lookup<'a>(pairs: &'a [(String, String)], name: &str) -> Option<&'a str> {
    pairs
        .iter()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.as_str())
}

/// Where a request goes
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Route {
    Handler(RequestKind),
    Preflight,
    NotFound,
    MethodNotAllowed,
}

fn route(method: &Method, path: &str) -> Route {
    match (method, path) {
        (Method::Options, _) => Route::Preflight,
        (Method::Get, "/seckill") => Route::Handler(RequestKind::Seckill),
        (Method::Get, "/secinfo") => Route::Handler(RequestKind::SecInfo),
        (Method::Get, _) => Route::NotFound,
        _ => Route::MethodNotAllowed,
    }
}

/// Parse the given HTTP request
///
/// If [`None`] is returned, the request was already answered with a
/// corresponding error message.
pub fn parse(rq: tiny_http::Request) -> Option<Request> {
    let (path, query) = match rq.url().split_once('?') {
        Some((path, query)) => (path, query),
        None => (rq.url(), ""),
    };
    let kind = match route(rq.method(), path) {
        Route::Handler(kind) => kind,
        Route::Preflight => {
            send(rq, Response::empty(204));
            return None;
        }
        Route::NotFound => {
            send(rq, Response::from_string(NOT_FOUND).with_status_code(404));
            return None;
        }
        Route::MethodNotAllowed => {
            send(rq, Response::empty(405));
            return None;
        }
    };

    let id = request_id(&rq);
    let query = match decode_query(query) {
        Ok(query) => query,
        Err(err) => {
            let envelope = Envelope::error(
                ErrorCode::InvalidRequest,
                format!("invalid request: malformed query: {err}"),
            );
            respond_json(rq, &envelope, id);
            return None;
        }
    };
    let cookies = parse_cookies(&rq);
    let client_addr = rq.remote_addr().map(|addr| addr.ip());

    Some(Request::from_raw(
        kind,
        id,
        unix_now(),
        client_addr,
        Box::new(HttpRequest {
            inner: rq,
            query,
            cookies,
        }),
    ))
}

/// Decode a query string; a `%` must start a two-digit hex escape
fn decode_query(query: &str) -> Result<Vec<(String, String)>, String> {
    let bytes = query.as_bytes();
    for (at, _) in query.match_indices('%') {
        let escape = bytes.get(at + 1..at + 3);
        if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
            return Err(format!("broken percent escape at byte {at}"));
        }
    }
    serde_urlencoded::from_str(query).map_err(|err| err.to_string())
}

/// Take the client's `X-Request-Id` if it is a UUID, otherwise mint one
fn request_id(rq: &tiny_http::Request) -> Uuid {
    rq.headers()
        .iter()
        .filter(|hdr| hdr.field.equiv(REQUEST_ID_HEADER))
        .find_map(|hdr| Uuid::parse_str(hdr.value.as_str()).ok())
        .unwrap_or_else(Uuid::new_v4)
}

/// Decode every cookie of every `Cookie` header; malformed pairs are skipped
fn parse_cookies(rq: &tiny_http::Request) -> Vec<(String, String)> {
    rq.headers()
        .iter()
        .filter(|hdr| hdr.field.equiv("cookie"))
        .flat_map(|hdr| hdr.value.as_str().split(';'))
        .filter_map(|pair| cookie::Cookie::parse_encoded(pair.trim()).ok())
        .map(|c| (c.name().to_owned(), c.value().to_owned()))
        .collect()
}

/// Current wall-clock second, 0 if the clock is before the epoch
fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs() as i64)
}

fn respond_json(rq: tiny_http::Request, envelope: &Envelope, request_id: Uuid) {
    let body = match envelope.to_json() {
        Ok(body) => body,
        Err(err) => {
            error!(error = %err, "cannot serialise response");
            br#"{"code":1001,"message":"invalid request"}"#.to_vec()
        }
    };
    let mut res = Response::from_data(body);
    add_header(&mut res, "Content-Type", b"application/json");
    add_header(&mut res, REQUEST_ID_HEADER, request_id.hyphenated().to_string().as_bytes());
    send(rq, res);
}

/// Add CORS headers to `res` and send it
fn send<R: Read>(rq: tiny_http::Request, mut res: Response<R>) {
    add_response_cors_headers(&mut res);
    if let Err(err) = rq.respond(res) {
        debug!(error = %err, "client went away before the response was sent");
    }
}

fn add_header<R: Read>(res: &mut Response<R>, name: &str, value: &[u8]) {
    if let Ok(header) = Header::from_bytes(name.as_bytes(), value) {
        res.add_header(header);
    }
}

/// Add CORS headers to `res`
fn add_response_cors_headers<R: Read>(res: &mut Response<R>) {
    add_header(res, "Access-Control-Request-Method", b"*");
    add_header(res, "Access-Control-Allow-Origin", b"*");
    add_header(res, "Access-Control-Allow-Headers", b"*");
    add_header(res, "Access-Control-Expose-Headers", b"*");
}

#[cfg(test)]
mod tests {
    use std::io::{Read as _, Write as _};
    use std::net::{IpAddr, Ipv4Addr, TcpStream};
    use std::time::Duration;

    use super::*;

    const SIGN: &str = "0c1a54d1459c18f847ef083b3c947493";

    /// Send `raw` to a fresh server, run `inspect` on what reaches the
    /// handler, answer it with success and return the raw response
    fn exchange<T>(raw: &str, inspect: impl FnOnce(&Request) -> T) -> (Option<T>, String) {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let addr = server.server_addr().to_ip().unwrap();
        let mut client = TcpStream::connect(addr).unwrap();
        client.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
        client.write_all(raw.as_bytes()).unwrap();

        let rq = server
            .recv_timeout(Duration::from_secs(5))
            .unwrap()
            .expect("request arrives");
        let seen = parse(rq).map(|rq| {
            let seen = inspect(&rq);
            rq.respond(Envelope::success());
            seen
        });

        let mut response = String::new();
        client.read_to_string(&mut response).unwrap();
        (seen, response)
    }

    fn raw(method: &str, target: &str, headers: &[&str]) -> String {
        let mut raw = format!("{method} {target} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n");
        for header in headers {
            raw.push_str(header);
            raw.push_str("\r\n");
        }
        raw.push_str("\r\n");
        raw
    }

    fn header<'a>(response: &'a str, name: &str) -> Option<&'a str> {
        let (head, _) = response.split_once("\r\n\r\n")?;
        head.lines().skip(1).find_map(|line| {
            let (field, value) = line.split_once(':')?;
            field.eq_ignore_ascii_case(name).then(|| value.trim())
        })
    }

    fn body(response: &str) -> &str {
        response.split_once("\r\n\r\n").map_or("", |(_, body)| body)
    }

    #[test]
    fn routing() {
        assert_eq!(
            route(&Method::Get, "/seckill"),
            Route::Handler(RequestKind::Seckill)
        );
        assert_eq!(
            route(&Method::Get, "/secinfo"),
            Route::Handler(RequestKind::SecInfo)
        );
        assert_eq!(route(&Method::Get, "/seckill/"), Route::NotFound);
        assert_eq!(route(&Method::Get, "/"), Route::NotFound);
        assert_eq!(route(&Method::Options, "/anything"), Route::Preflight);
        assert_eq!(route(&Method::Post, "/seckill"), Route::MethodNotAllowed);
        assert_eq!(route(&Method::Delete, "/secinfo"), Route::MethodNotAllowed);
    }

    #[test]
    fn first_query_value_wins() {
        let query = decode_query("product_id=1028&src=a%20b&product_id=7").unwrap();
        assert_eq!(lookup(&query, "product_id"), Some("1028"));
        assert_eq!(lookup(&query, "src"), Some("a b"));
        assert_eq!(lookup(&query, "nance"), None);
    }

    #[test]
    fn broken_percent_escapes() {
        for bad in ["product_id=%ZZ", "product_id=1028%", "src=%4", "a=%%41"] {
            assert!(decode_query(bad).is_err(), "{bad}");
        }
        assert!(decode_query("").unwrap().is_empty());
        assert_eq!(decode_query("a&b=%41").unwrap().len(), 2);
    }

    #[test]
    fn handler_sees_query_cookies_and_metadata() {
        let id = Uuid::new_v4();
        let before = unix_now();
        let rq = raw(
            "GET",
            "/seckill?product_id=1028&src=a%20b",
            &[
                &format!("X-Request-Id: {id}"),
                &format!("Cookie: userId=7; userAuthSign={SIGN}"),
                "Cookie: theme=dark%20blue",
            ],
        );
        let (seen, response) = exchange(&rq, |rq| {
            assert_eq!(rq.kind(), RequestKind::Seckill);
            assert_eq!(rq.id(), id);
            assert_eq!(rq.query("product_id"), Some("1028"));
            assert_eq!(rq.query("src"), Some("a b"));
            assert_eq!(rq.cookie("userId"), Some("7"));
            assert_eq!(rq.cookie("userAuthSign"), Some(SIGN));
            assert_eq!(rq.cookie("theme"), Some("dark blue"));
            assert_eq!(rq.client_addr(), Some(IpAddr::V4(Ipv4Addr::LOCALHOST)));
            rq.access_time()
        });
        let access_time = seen.expect("request reaches the handler");
        assert!((before..=unix_now()).contains(&access_time));

        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert_eq!(header(&response, "content-type"), Some("application/json"));
        assert_eq!(header(&response, REQUEST_ID_HEADER), Some(id.to_string().as_str()));
        assert_eq!(header(&response, "access-control-allow-origin"), Some("*"));
        assert_eq!(body(&response), r#"{"code":0,"message":"success"}"#);
    }

    #[test]
    fn request_id_is_minted_unless_a_uuid_is_given() {
        for headers in [&[][..], &["X-Request-Id: not-a-uuid"][..]] {
            let (seen, response) = exchange(&raw("GET", "/secinfo", headers), |rq| rq.id());
            let id = seen.expect("request reaches the handler");
            assert!(!id.is_nil());
            assert_eq!(header(&response, REQUEST_ID_HEADER), Some(id.to_string().as_str()));
        }
    }

    #[test]
    fn answered_without_the_handler() {
        let cases = [
            (raw("OPTIONS", "/seckill", &[]), "HTTP/1.1 204"),
            (raw("POST", "/seckill", &[]), "HTTP/1.1 405"),
            (raw("DELETE", "/secinfo", &[]), "HTTP/1.1 405"),
            (raw("GET", "/nope", &[]), "HTTP/1.1 404"),
        ];
        for (rq, status) in cases {
            let (seen, response) = exchange(&rq, |_| ());
            assert!(seen.is_none(), "{rq}");
            assert!(response.starts_with(status), "{rq}: {response}");
            assert_eq!(header(&response, "access-control-allow-origin"), Some("*"));
            assert_eq!(header(&response, "access-control-allow-headers"), Some("*"));
        }

        let (_, response) = exchange(&raw("GET", "/nope", &[]), |_| ());
        assert!(body(&response).contains("/seckill?product_id="));
        assert!(body(&response).contains("/secinfo"));
    }

    #[test]
    fn malformed_query_is_an_invalid_request() {
        let (seen, response) = exchange(&raw("GET", "/secinfo?product_id=%ZZ&a", &[]), |_| ());
        assert!(seen.is_none());
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert_eq!(header(&response, "content-type"), Some("application/json"));
        assert!(header(&response, REQUEST_ID_HEADER).is_some());
        assert!(body(&response).starts_with(r#"{"code":1001,"message":"invalid request: malformed query"#));
    }
}
